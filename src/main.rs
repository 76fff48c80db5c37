mod cli;
mod commands;
mod cwm;
mod env_loader;
mod error;
mod logging;

use crate::error::CwmError;

fn main() {
    env_loader::load_dotenv();
    logging::init_tracing();
    env_loader::warn_unknown_env();

    match cli::run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            match err.chain().find_map(|cause| cause.downcast_ref::<CwmError>()) {
                Some(cwm_err) => eprintln!("error[{}]: {err:#}", cwm_err.code().as_str()),
                None => eprintln!("error: {err:#}"),
            }
            std::process::exit(1);
        }
    }
}
