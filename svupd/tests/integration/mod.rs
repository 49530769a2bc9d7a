mod command_tests;
mod config_tests;
mod hook_tests;
