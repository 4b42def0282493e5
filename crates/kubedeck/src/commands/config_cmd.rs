//! Config subcommand handlers.

use kubedeck_config::load_settings_from;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::commands::settings_file;
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = settings_file(global);
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Show => {
            let settings = load_settings_from(&path)?;
            settings.tuning.to_core_config()?;

            let toml = toml::to_string_pretty(&settings)?;
            let out = output::render_single(
                global.output,
                &settings,
                |_| toml.trim_end().to_owned(),
                |_| toml.trim_end().to_owned(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
