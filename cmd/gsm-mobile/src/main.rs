// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! Thin binary entry point, modelled on `cmd/tikv-server`'s role as a thin
//! wrapper over a `server`-style crate (SPEC_FULL.md §6.1): parse a config
//! path from `std::env::args` (no CLI-flag parser — this stack has no
//! VTY/CLI surface, so `clap` would be dead weight), build a `StackConfig`,
//! bind a `GsmMobileStack`, register one persistent NS-VC toward the
//! configured peer, and run the single-threaded `poll`-style main loop until
//! SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use gsm_mobile_stack::config::StackConfig;
use gsm_mobile_stack::GsmMobileStack;
use util::logger::{self, info, warn, LogFormat};
use util::time::Instant;

/// Hard-coded for now: no VTY, so the peer address a mobile-side stack
/// resets toward is either compiled in or read from an env var. Mirrors
/// `original_source`'s `-r`/remote-address command line flag in spirit
/// without introducing a flag parser this spec's scope doesn't call for.
const PEER_ENV: &str = "GSM_MOBILE_PEER";
const DEFAULT_PEER: &str = "127.0.0.1:23000";
const NSEI: u16 = 0x0100;
const NSVCI: u16 = 1;

fn main() {
    logger::init_log(LogFormat::Text);

    let config_path = std::env::args().nth(1);
    let cfg = match config_path {
        Some(path) => match StackConfig::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("gsm-mobile: failed to load config, using defaults"; "path" => %path, "error" => %e);
                StackConfig::default()
            }
        },
        None => StackConfig::default(),
    };

    let mut stack = match GsmMobileStack::bind(&cfg) {
        Ok(stack) => stack,
        Err(e) => {
            eprintln!("gsm-mobile: failed to bind UDP transport: {e}");
            std::process::exit(1);
        }
    };

    let peer: SocketAddr = std::env::var(PEER_ENV)
        .unwrap_or_else(|_| DEFAULT_PEER.to_string())
        .parse()
        .unwrap_or_else(|_| DEFAULT_PEER.parse().unwrap());
    info!("gsm-mobile: starting RESET procedure"; "peer" => %peer, "nsei" => NSEI, "nsvci" => NSVCI);
    stack.create_nsvc(NSEI, NSVCI, peer);

    info!("gsm-mobile: entering main loop");
    run_main_loop(&mut stack);
}

/// The single-threaded cooperative main loop spec.md §5 describes: compute
/// the next timer deadline, sleep (standing in for `poll`/`select`) for at
/// most that long, then drain whatever socket traffic and timer expiries are
/// ready. A real deployment replaces the `thread::sleep` below with a
/// `poll(2)`/`epoll` wait on the UDP file descriptor using the same timeout;
/// the cooperative structure — one iteration handles at most one readiness
/// event before recomputing the next deadline — is unchanged either way.
fn run_main_loop(stack: &mut GsmMobileStack) {
    loop {
        let now = Instant::now();
        let timeout = stack.nearest_timeout(now).unwrap_or(Duration::from_millis(200));
        thread::sleep(timeout.min(Duration::from_millis(200)));

        let now = Instant::now();
        stack.expire_timers(now);
        stack.reap_dead_nsvcs();

        while stack.poll_socket().unwrap_or(false) {}

        for ind in stack.take_indications() {
            info!("gsm-mobile: UNITDATA delivered to BSSGP user";
                "nsei" => ind.nsei, "bvci" => ind.bvci, "len" => ind.payload.len());
        }
        for sig in stack.take_signals() {
            info!("gsm-mobile: NS signal"; "signal" => ?sig.signal, "nsei" => sig.nsei, "nsvci" => sig.nsvci);
        }
    }
}
