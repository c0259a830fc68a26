// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use wiretap::config::Config;
use wiretap::{error::Error, log, server};

fn main() {
    if let Err(err) = run() {
        eprintln!("wiretapd: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    let config = Config::from_args()?;
    log::init(&config.log)?;
    server::run_loop(config)
}
