// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command line interface for building .deb packages and APT repositories.

mod cli;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let exit_code = match cli::run_cli().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("simple-deb: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
