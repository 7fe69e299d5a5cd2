//! Minimal end-to-end walkthrough: define an aggregate, persist events,
//! replay them, and watch the decorated messages flow to a consumer.
//!
//! Run with: `cargo run --example quickstart`

use std::sync::Arc;

use refold::{
    AggregateRoot, AggregateRootRepository, Apply, ConsumerDispatcher, DomainEvent, EventRegistry,
    Handle, MessageConsumer, SavedMessage, message::keys, store::inmemory,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Domain
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAdded {
    pub title: String,
}

impl DomainEvent for TaskAdded {
    const KIND: &'static str = "task-added";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub title: String,
}

impl DomainEvent for TaskCompleted {
    const KIND: &'static str = "task-completed";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TodoEvent {
    Added(TaskAdded),
    Completed(TaskCompleted),
}

#[derive(Debug, Default)]
pub struct TodoList {
    open: Vec<String>,
    done: Vec<String>,
}

impl Apply<TaskAdded> for TodoList {
    fn apply(&mut self, event: &TaskAdded) {
        self.open.push(event.title.clone());
    }
}

impl Apply<TaskCompleted> for TodoList {
    fn apply(&mut self, event: &TaskCompleted) {
        self.open.retain(|title| *title != event.title);
        self.done.push(event.title.clone());
    }
}

impl AggregateRoot for TodoList {
    const KIND: &'static str = "todo-list";

    type Id = String;
    type Event = TodoEvent;
    type Error = String;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TodoEvent::Added(e) => Apply::apply(self, e),
            TodoEvent::Completed(e) => Apply::apply(self, e),
        }
    }
}

pub struct AddTask {
    pub title: String,
}

impl Handle<AddTask> for TodoList {
    fn handle(&self, command: &AddTask) -> Result<Vec<Self::Event>, Self::Error> {
        if self.open.contains(&command.title) {
            return Err(format!("task `{}` is already on the list", command.title));
        }
        Ok(vec![TodoEvent::Added(TaskAdded {
            title: command.title.clone(),
        })])
    }
}

pub struct CompleteTask {
    pub title: String,
}

impl Handle<CompleteTask> for TodoList {
    fn handle(&self, command: &CompleteTask) -> Result<Vec<Self::Event>, Self::Error> {
        if !self.open.contains(&command.title) {
            return Err(format!("task `{}` is not open", command.title));
        }
        Ok(vec![TodoEvent::Completed(TaskCompleted {
            title: command.title.clone(),
        })])
    }
}

fn registry() -> EventRegistry<TodoEvent> {
    EventRegistry::new()
        .with(TodoEvent::Added, |event| match event {
            TodoEvent::Added(e) => Some(e),
            TodoEvent::Completed(_) => None,
        })
        .with(TodoEvent::Completed, |event| match event {
            TodoEvent::Completed(e) => Some(e),
            TodoEvent::Added(_) => None,
        })
}

// =============================================================================
// A consumer watching the persisted stream
// =============================================================================

struct PrintingConsumer;

impl MessageConsumer<TodoEvent> for PrintingConsumer {
    fn name(&self) -> &str {
        "printing"
    }

    fn consume(
        &self,
        message: &SavedMessage<TodoEvent>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let event_id = message
            .headers()
            .get_str(keys::EVENT_ID)
            .unwrap_or("<none>");
        println!(
            "   -> dispatched v{} ({event_id}): {:?}",
            message.version,
            message.event()
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Quickstart ===\n");

    let repository = AggregateRootRepository::<TodoList, _>::new(inmemory::Store::new(), registry())
        .with_dispatcher(ConsumerDispatcher::new().with(Arc::new(PrintingConsumer)));

    let id = "groceries".to_string();

    println!("1. Recording a few facts...");
    let mut list = repository.retrieve(&id).await?;
    list.execute(&AddTask {
        title: "milk".to_string(),
    })?;
    list.execute(&AddTask {
        title: "coffee".to_string(),
    })?;
    list.execute(&CompleteTask {
        title: "milk".to_string(),
    })?;
    repository.persist(&mut list).await?;

    println!("\n2. Reloading from the stream...");
    let reloaded = repository.retrieve(&id).await?;
    println!(
        "   version {}, open: {:?}, done: {:?}",
        reloaded.version(),
        reloaded.state().open,
        reloaded.state().done
    );

    println!("\n3. Commands are validated against replayed state...");
    let mut reloaded = reloaded;
    match reloaded.execute(&CompleteTask {
        title: "milk".to_string(),
    }) {
        Err(reason) => println!("   correctly rejected: {reason}"),
        Ok(()) => println!("   unexpectedly accepted!"),
    }

    Ok(())
}
