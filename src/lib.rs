pub mod cli;
pub mod logging;
pub mod migration;
pub mod notifications;

pub mod util {
    pub mod db;
    pub mod env;
}
