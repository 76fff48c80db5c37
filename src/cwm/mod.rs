pub mod archive;
pub mod audit;
pub mod backup;
pub mod bank;
pub mod config;
pub mod history;
pub mod ledger;
pub mod paths;
pub mod storage;
pub mod util;
pub mod warn;
pub mod watch;
