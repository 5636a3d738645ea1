//! Public events listing

use chrono::{DateTime, Utc};
use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::backend::{self, Backend, Query};
use crate::error::Error;
use crate::models::{tables, Event};
use crate::notify::Notifier;
use crate::panels::PanelContext;

/// Events ordered by date, soonest first
pub struct EventsBoard {
    ctx: PanelContext,
    events: Vec<Event>,
}

impl EventsBoard {
    pub fn new(backend: Arc<dyn Backend>, notifier: Notifier, scope: CancellationToken) -> Self {
        Self {
            ctx: PanelContext::new(backend, notifier, scope),
            events: Vec::new(),
        }
    }

    pub async fn load(&mut self) -> Result<(), Error> {
        let query = Query::table(tables::EVENTS).order("event_date", true);
        let fetched = self
            .ctx
            .scoped(backend::fetch::<Event>(self.ctx.backend(), &query))
            .await;

        match fetched {
            Ok(events) => {
                info!("loaded {} events", events.len());
                self.events = events;
                Ok(())
            }
            Err(e) => {
                self.ctx.fetch_failed("events", &e);
                Err(e)
            }
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Events on or after `now`
    pub fn upcoming(&self, now: DateTime<Utc>) -> Vec<&Event> {
        self.events.iter().filter(|e| e.event_date >= now).collect()
    }

    pub fn close(&self) {
        self.ctx.close();
    }
}
