// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use color_eyre::Result;
use surefire_cli::SurefireApp;

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = enable_ansi_support::enable_ansi_support();

    let app = SurefireApp::parse();
    let output = app.init_output();

    match app.exec(output) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr(&output.stderr_styles());
            std::process::exit(error.process_exit_code())
        }
    }
}
