pub mod guild_configs;
pub mod module_configs;
