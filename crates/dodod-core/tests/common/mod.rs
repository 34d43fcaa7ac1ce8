#![allow(dead_code)]

use std::path::Path;

use dodod_core::document::{DocumentSchema, FieldDescriptor, FieldKind, Model};
use dodod_core::{Database, KdfParams, Options};
use serde::{Deserialize, Serialize};

/// Cheap Argon2id cost so tests stay fast.
pub fn test_kdf() -> KdfParams {
    KdfParams {
        memory_kb: 64,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn options(path: &Path) -> Options {
    Options::new(path).with_kdf_params(test_kdf())
}

/// Open a store at `path` with every test type registered.
pub fn open_db(options: Options) -> Database {
    let mut db = Database::new(options);
    register_all(&mut db);
    db.open().expect("open should succeed");
    db
}

pub fn register_all(db: &mut Database) {
    db.register::<Note>().expect("register Note");
    db.register::<Task>().expect("register Task");
    db.register::<Event>().expect("register Event");
    db.register::<Place>().expect("register Place");
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub body: String,
    pub mixed_type: String,
    pub rating: i64,
}

impl Note {
    pub fn new(id: &str, title: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            mixed_type: "note".to_string(),
            rating: 0,
        }
    }
}

impl DocumentSchema for Note {
    const TYPE_NAME: &'static str = "Note";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("id", FieldKind::String).option("analyzer", "keyword"),
            FieldDescriptor::new("title", FieldKind::String),
            FieldDescriptor::new("body", FieldKind::String),
            FieldDescriptor::new("mixed_type", FieldKind::String),
            FieldDescriptor::new("rating", FieldKind::I64),
        ]
    }
}

impl Model for Note {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub summary: String,
    pub mixed_type: String,
    pub done: bool,
}

impl DocumentSchema for Task {
    const TYPE_NAME: &'static str = "Task";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("id", FieldKind::String).option("analyzer", "keyword"),
            FieldDescriptor::new("summary", FieldKind::String),
            FieldDescriptor::new("mixed_type", FieldKind::String),
            FieldDescriptor::new("done", FieldKind::Bool),
        ]
    }
}

impl Model for Task {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub mixed_type: String,
    pub starts: String,
}

impl DocumentSchema for Event {
    const TYPE_NAME: &'static str = "Event";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("id", FieldKind::String).option("analyzer", "keyword"),
            FieldDescriptor::new("name", FieldKind::String),
            FieldDescriptor::new("mixed_type", FieldKind::String),
            FieldDescriptor::new("starts", FieldKind::Timestamp),
        ]
    }
}

impl Model for Event {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub location: String,
}

impl DocumentSchema for Place {
    const TYPE_NAME: &'static str = "Place";

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("id", FieldKind::String).option("analyzer", "keyword"),
            FieldDescriptor::new("name", FieldKind::String),
            FieldDescriptor::new("location", FieldKind::String).option("type", "geopoint"),
        ]
    }
}

impl Model for Place {
    fn id(&self) -> &str {
        &self.id
    }
}
