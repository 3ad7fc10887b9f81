pub mod events;

use crate::modules::{Module, ModuleDefinition};

pub fn module() -> Module {
    Module {
        definition: ModuleDefinition {
            id: "logging",
            name: "Logging",
            description: "Logs member nickname, role and username changes",
        },
        commands: vec![],
        event_handlers: vec![events::handler],
    }
}
