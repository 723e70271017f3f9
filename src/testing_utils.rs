//! Shared fixtures for unit tests and for downstream crates that enable the
//! `test-utils` feature

use serde_json::json;

use crate::class::ClassHandle;
use crate::model::{NetworkModel, StaticTableOptions};
use crate::store::SledStore;
use crate::table::TableHandle;

/// Model with one static table of `{cat, v}` rows: two in category `a`,
/// one in `b`
pub fn scenario_model() -> (NetworkModel, TableHandle) {
    let model = NetworkModel::new("scenario");
    let table = model
        .add_static_table(StaticTableOptions {
            name: "scenario".to_string(),
            data: json!([
                {"cat": "a", "v": 1},
                {"cat": "a", "v": 3},
                {"cat": "b", "v": 5},
            ]),
            attributes: vec!["cat".to_string(), "v".to_string()],
        })
        .and_then(|class| class.table())
        .expect("Failed to create scenario table");
    (model, table)
}

/// Three people, three places and a generic table of visits between them
pub struct PeopleAndPlaces {
    pub model: NetworkModel,
    /// Node class keyed by name, with `home`, `work` and `school` places
    pub people: ClassHandle,
    /// Node class keyed by place name
    pub places: ClassHandle,
    /// Generic class of `{person, place}` rows
    pub visits: ClassHandle,
}

pub fn people_and_places() -> PeopleAndPlaces {
    let model = NetworkModel::new("people and places");
    let people = model
        .add_static_table(StaticTableOptions {
            name: "people".to_string(),
            data: json!({
                "alice": {"home": "north", "work": "south", "school": "east"},
                "bob": {"home": "south", "work": "north", "school": "east"},
                "carol": {"home": "north", "work": "east", "school": "south"},
            }),
            attributes: Vec::new(),
        })
        .and_then(|class| class.interpret_as_nodes())
        .expect("Failed to create people");
    let places = model
        .add_static_table(StaticTableOptions {
            name: "places".to_string(),
            data: json!({
                "north": {"climate": "cold"},
                "south": {"climate": "warm"},
                "east": {"climate": "mild"},
            }),
            attributes: Vec::new(),
        })
        .and_then(|class| class.interpret_as_nodes())
        .expect("Failed to create places");
    let visits = model
        .add_static_table(StaticTableOptions {
            name: "visits".to_string(),
            data: json!([
                {"person": "alice", "place": "north"},
                {"person": "bob", "place": "east"},
                {"person": "carol", "place": "south"},
                {"person": "alice", "place": "south"},
            ]),
            attributes: Vec::new(),
        })
        .expect("Failed to create visits");
    PeopleAndPlaces {
        model,
        people,
        places,
        visits,
    }
}

/// Sled-backed store that disappears when dropped
pub fn temporary_store() -> SledStore {
    SledStore::temporary().expect("Failed to create temporary sled store")
}
