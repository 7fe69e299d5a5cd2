//! Demonstrates optimistic concurrency control under racing writers.
//!
//! Two repositories share one store, load the same aggregate at the same
//! version, and race their appends: exactly one wins, the other reloads and
//! retries against fresher state.
//!
//! Run with: `cargo run --example optimistic_concurrency`

use refold::{
    AggregateRoot, AggregateRootRepository, Apply, DomainEvent, EventRegistry, Handle,
    PersistError, store::inmemory,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Domain: seat inventory for one screening
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatsReleased {
    pub count: u32,
}

impl DomainEvent for SeatsReleased {
    const KIND: &'static str = "seats-released";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatsBooked {
    pub count: u32,
}

impl DomainEvent for SeatsBooked {
    const KIND: &'static str = "seats-booked";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScreeningEvent {
    Released(SeatsReleased),
    Booked(SeatsBooked),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScreeningError {
    #[error("not enough seats: requested {requested}, available {available}")]
    NotEnoughSeats { requested: u32, available: u32 },
}

#[derive(Debug, Default)]
pub struct Screening {
    available: u32,
}

impl Apply<SeatsReleased> for Screening {
    fn apply(&mut self, event: &SeatsReleased) {
        self.available += event.count;
    }
}

impl Apply<SeatsBooked> for Screening {
    fn apply(&mut self, event: &SeatsBooked) {
        self.available = self.available.saturating_sub(event.count);
    }
}

impl AggregateRoot for Screening {
    const KIND: &'static str = "screening";

    type Id = String;
    type Event = ScreeningEvent;
    type Error = ScreeningError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ScreeningEvent::Released(e) => Apply::apply(self, e),
            ScreeningEvent::Booked(e) => Apply::apply(self, e),
        }
    }
}

pub struct ReleaseSeats {
    pub count: u32,
}

impl Handle<ReleaseSeats> for Screening {
    fn handle(&self, command: &ReleaseSeats) -> Result<Vec<Self::Event>, Self::Error> {
        Ok(vec![ScreeningEvent::Released(SeatsReleased {
            count: command.count,
        })])
    }
}

pub struct BookSeats {
    pub count: u32,
}

impl Handle<BookSeats> for Screening {
    fn handle(&self, command: &BookSeats) -> Result<Vec<Self::Event>, Self::Error> {
        if command.count > self.available {
            return Err(ScreeningError::NotEnoughSeats {
                requested: command.count,
                available: self.available,
            });
        }
        Ok(vec![ScreeningEvent::Booked(SeatsBooked {
            count: command.count,
        })])
    }
}

fn registry() -> EventRegistry<ScreeningEvent> {
    EventRegistry::new()
        .with(ScreeningEvent::Released, |event| match event {
            ScreeningEvent::Released(e) => Some(e),
            ScreeningEvent::Booked(_) => None,
        })
        .with(ScreeningEvent::Booked, |event| match event {
            ScreeningEvent::Booked(e) => Some(e),
            ScreeningEvent::Released(_) => None,
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Optimistic Concurrency ===\n");

    let store = inmemory::Store::new();
    let box_office = AggregateRootRepository::<Screening, _>::new(store.clone(), registry());
    let website = AggregateRootRepository::<Screening, _>::new(store, registry());
    let id = "screening-42".to_string();

    println!("1. Releasing 10 seats...");
    box_office.execute(&id, &ReleaseSeats { count: 10 }).await?;

    println!("2. Two callers load the screening at the same version...");
    let mut at_box_office = box_office.retrieve(&id).await?;
    let mut on_website = website.retrieve(&id).await?;
    println!(
        "   both see version {} with {} seats",
        at_box_office.version(),
        at_box_office.state().available
    );

    println!("3. The website books 6 seats first...");
    on_website.execute(&BookSeats { count: 6 })?;
    website.persist(&mut on_website).await?;

    println!("4. The box office tries to book 6 seats at the stale version...");
    at_box_office.execute(&BookSeats { count: 6 })?;
    match box_office.persist(&mut at_box_office).await {
        Err(PersistError::Conflict(conflict)) => {
            println!("   rejected: {conflict}");
        }
        Ok(_) => println!("   unexpectedly succeeded!"),
        Err(other) => return Err(other.into()),
    }

    println!("5. The box office reloads and re-runs the command on fresh state...");
    let mut at_box_office = box_office.retrieve(&id).await?;
    match at_box_office.execute(&BookSeats { count: 6 }) {
        Err(reason) => println!("   correctly rejected now: {reason}"),
        Ok(()) => println!("   unexpectedly accepted!"),
    }

    println!("6. A smaller booking goes through...");
    at_box_office.execute(&BookSeats { count: 4 })?;
    box_office.persist(&mut at_box_office).await?;

    let settled = box_office.retrieve(&id).await?;
    println!(
        "\nFinal state: version {}, {} seats available",
        settled.version(),
        settled.state().available
    );

    Ok(())
}
