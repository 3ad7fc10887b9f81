pub mod commands;

use crate::modules::{Module, ModuleDefinition};

pub fn module() -> Module {
    Module {
        definition: ModuleDefinition {
            id: "roles",
            name: "Roles",
            description: "Role management that logs under the invoking moderator",
        },
        commands: vec![commands::role()],
        event_handlers: vec![],
    }
}
