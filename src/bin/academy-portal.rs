use academy_portal::notify::NoticeReceiver;
use academy_portal::prelude::*;
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::debug;

#[derive(Parser, Debug)]
#[clap(name = "academy-portal", version)]
#[clap(about = "Command-line client for the training portal", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in and print the dashboard for your role
    Login {
        #[clap(long)]
        email: String,
        #[clap(long)]
        password: String,
    },
    /// Create an account and its profile
    Register {
        #[clap(long)]
        name: String,
        #[clap(long)]
        email: String,
        #[clap(long)]
        password: String,
        /// student, instructor or admin
        #[clap(long, default_value = "student")]
        role: String,
    },
    /// List upcoming events
    Events,
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = PortalConfig::from_env()?;
    let (portal, mut notices) = Portal::connect(&config)?;
    portal.session().settled().await?;

    let result = execute(&portal, cli.command).await;

    drain(&mut notices);
    portal.shutdown().await;
    result
}

async fn execute(portal: &Portal, command: Commands) -> Result<(), Error> {
    match command {
        Commands::Login { email, password } => {
            portal
                .accounts()
                .login(&email, &password)
                .await
                .map_err(failure)?;
            print_dashboard(portal).await
        }
        Commands::Register {
            name,
            email,
            password,
            role,
        } => {
            let form = RegistrationForm {
                full_name: name,
                email,
                confirm_password: password.clone(),
                password,
                role: Role::parse(&role),
            };
            let profile = portal
                .accounts()
                .register_form(&form)
                .await
                .map_err(failure)?;
            println!("Registered {} <{}> as {}", profile.full_name, profile.email, profile.role);
            Ok(())
        }
        Commands::Events => {
            let mut board = portal.events();
            board.load().await?;
            for event in board.upcoming(Utc::now()) {
                println!(
                    "{}  {}  @ {}  ({} seats left)",
                    event.event_date.format("%Y-%m-%d %H:%M"),
                    event.title,
                    event.location,
                    event.seats_left()
                );
            }
            Ok(())
        }
    }
}

fn failure(err: AuthFailure) -> Error {
    Error::auth(err.message())
}

async fn print_dashboard(portal: &Portal) -> Result<(), Error> {
    let state = portal
        .session()
        .wait_for(|s| s.is_signed_in() && !s.loading)
        .await?;
    debug!("session resolved: {:?}", state.identity);

    let mut dashboard = match portal.open_dashboard() {
        Some(dashboard) => dashboard,
        None => {
            println!("Signed in, but no profile was found for this account.");
            return Ok(());
        }
    };
    dashboard.load().await?;

    match &dashboard {
        Dashboard::Admin(panel) => {
            let overview = panel.overview();
            println!("Admin dashboard");
            println!("  students:    {}", overview.students);
            println!("  instructors: {}", overview.instructors);
            println!("  courses:     {}", overview.total_courses);
            println!("  revenue:     {}", overview.revenue_label());
        }
        Dashboard::Instructor(panel) => {
            let totals = panel.totals();
            println!("Instructor dashboard for {}", panel.profile().full_name);
            for course in panel.courses() {
                println!(
                    "  {:<40} {:>4} students  ${:.2}",
                    course.course.title,
                    course.student_count,
                    course.revenue()
                );
            }
            println!("  total students: {}", totals.students);
            println!("  total revenue:  ${:.2}", totals.revenue);
            match totals.average_rating {
                Some(rating) => println!("  average rating: {:.1}", rating),
                None => println!("  average rating: n/a"),
            }
        }
        Dashboard::Student(panel) => {
            let stats = panel.stats();
            println!("Student dashboard for {}", panel.profile().full_name);
            for enrolled in panel.enrolled() {
                println!("  {:<40} {:>3}%", enrolled.course.title, enrolled.progress);
            }
            println!(
                "  enrolled: {}  completed: {}  in progress: {}  overall: {}%",
                stats.enrolled, stats.completed, stats.in_progress, stats.overall_progress
            );
            println!("  {} more courses available", panel.available().len());
        }
    }
    dashboard.close();
    Ok(())
}

fn drain(notices: &mut NoticeReceiver) {
    while let Ok(notice) = notices.try_recv() {
        match notice.level {
            NoticeLevel::Success => println!("{}", notice.message),
            NoticeLevel::Error => eprintln!("{}", notice.message),
        }
    }
}
