//! pick-source — choose a PulseAudio capture source by its description
//!
//! Prints one line `pulse:<index>` naming the first non-monitor capture
//! source whose DESCRIPTION, PRODUCT_NAME or VENDOR_NAME property matches
//! (or, with `-v`, does not match) any of the given patterns. With `-H` the
//! process stays resident until that source is removed, so a supervisor can
//! restart the recorder when the device goes away.

use clap::Parser;
use regex::{Regex, RegexBuilder};

#[derive(Debug, Parser)]
#[command(
    name = "pick-source",
    about = "Print the first PulseAudio capture source matching the given patterns",
    disable_version_flag = true
)]
struct Cli {
    /// Invert match
    #[arg(short = 'v')]
    invert: bool,

    /// Ignore case
    #[arg(short = 'i')]
    ignore_case: bool,

    /// Extended regex (accepted for compatibility; patterns always use
    /// modern regex syntax)
    #[arg(short = 'E')]
    extended: bool,

    /// Hang until the chosen source is removed
    #[arg(short = 'H')]
    hang: bool,

    #[arg(value_name = "PATTERN")]
    patterns: Vec<String>,
}

/// The property keys a pattern is matched against.
const MATCH_KEYS: [&str; 3] = [
    "device.description",
    "device.product.name",
    "device.vendor.name",
];

/// What the selector needs to know about one source.
#[derive(Debug, Clone)]
struct SourceCard {
    index: u32,
    /// Sources mirroring a sink's playback are never selected.
    monitor: bool,
    properties: Vec<(String, String)>,
}

#[derive(Debug)]
struct Selector {
    patterns: Vec<Regex>,
    invert: bool,
}

impl Selector {
    fn compile(patterns: &[String], ignore_case: bool, invert: bool) -> Result<Self, String> {
        let patterns = patterns
            .iter()
            .map(|p| {
                tracing::debug!("compiling pattern: {}", p);
                RegexBuilder::new(p)
                    .case_insensitive(ignore_case)
                    .build()
                    .map_err(|e| format!("unable to compile pattern: {p} ({e})"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns, invert })
    }

    /// Decide whether this source is the one. Monitors never match; with no
    /// patterns the first real capture source wins.
    fn accepts(&self, card: &SourceCard) -> bool {
        if card.monitor {
            tracing::debug!("monitor source: index={}", card.index);
            return false;
        }
        if self.patterns.is_empty() {
            return true;
        }

        let mut matched = false;
        for (key, value) in &card.properties {
            if !MATCH_KEYS.contains(&key.as_str()) {
                continue;
            }
            tracing::trace!("checking property: {}={}", key, value);
            if self.patterns.iter().any(|p| p.is_match(value)) {
                tracing::debug!("matched property: {}={}", key, value);
                matched = true;
                break;
            }
        }
        matched != self.invert
    }
}

#[cfg(target_os = "linux")]
mod run {
    use super::{Cli, Selector, SourceCard};
    use libpulse_binding as pulse;
    use pulse::callbacks::ListResult;
    use pulse::context::subscribe::{Facility, InterestMaskSet, Operation};
    use pulse::context::{Context, State as CtxState};
    use pulse::mainloop::standard::{IterateResult, Mainloop};
    use pulse::proplist::Proplist;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// The subscription event stream, collapsed to the three cases the
    /// selection state machine cares about.
    enum SourceEvent {
        Card(SourceCard),
        New(u32),
        Removed(u32),
    }

    type EventQueue = Arc<Mutex<VecDeque<SourceEvent>>>;

    fn push_card(queue: &EventQueue, info: &pulse::context::introspect::SourceInfo) {
        let mut properties = Vec::new();
        for key in super::MATCH_KEYS {
            if let Some(value) = info.proplist.get_str(key) {
                properties.push((key.to_string(), value));
            }
        }
        let card = SourceCard {
            index: info.index,
            monitor: info.monitor_of_sink.is_some(),
            properties,
        };
        if let Ok(mut q) = queue.lock() {
            q.push_back(SourceEvent::Card(card));
        }
    }

    pub fn run(cli: Cli) -> i32 {
        let selector = match Selector::compile(&cli.patterns, cli.ignore_case, cli.invert) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{e}");
                return 1;
            }
        };
        if cli.extended {
            tracing::debug!("-E is implied: patterns use modern regex syntax");
        }

        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let interrupted = interrupted.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                interrupted.store(true, Ordering::SeqCst);
            }) {
                eprintln!("failed to install signal handler: {e}");
                return 1;
            }
        }

        let mut mainloop = match Mainloop::new() {
            Some(m) => m,
            None => {
                eprintln!("failed to create PulseAudio mainloop");
                return 1;
            }
        };

        let mut proplist = match Proplist::new() {
            Some(p) => p,
            None => {
                eprintln!("failed to create proplist");
                return 1;
            }
        };
        let _ = proplist.set_str(pulse::proplist::properties::APPLICATION_NAME, "pick-source");

        let mut context = match Context::new_with_proplist(&mainloop, "pick-source", &proplist) {
            Some(c) => c,
            None => {
                eprintln!("failed to create PulseAudio context");
                return 1;
            }
        };
        if let Err(e) = context.connect(None, pulse::context::FlagSet::NOFLAGS, None) {
            eprintln!("failed to connect to PulseAudio: {e}");
            return 1;
        }

        // wait for the context to become ready
        loop {
            match mainloop.iterate(true) {
                IterateResult::Success(_) => {}
                IterateResult::Err(e) => {
                    eprintln!("mainloop error: {e}");
                    return 1;
                }
                IterateResult::Quit(_) => return 1,
            }
            match context.get_state() {
                CtxState::Ready => break,
                CtxState::Failed | CtxState::Terminated => {
                    eprintln!("PulseAudio context failed to connect");
                    return 1;
                }
                _ => {}
            }
            if interrupted.load(Ordering::SeqCst) {
                return 1;
            }
        }

        let queue: EventQueue = Arc::new(Mutex::new(VecDeque::new()));

        // subscribe to source arrivals and removals, then sweep the
        // existing sources
        {
            let queue = queue.clone();
            context.set_subscribe_callback(Some(Box::new(move |facility, operation, index| {
                match (facility, operation) {
                    (Some(Facility::Source), Some(Operation::New)) => {
                        if let Ok(mut q) = queue.lock() {
                            q.push_back(SourceEvent::New(index));
                        }
                    }
                    (Some(Facility::Source), Some(Operation::Removed)) => {
                        if let Ok(mut q) = queue.lock() {
                            q.push_back(SourceEvent::Removed(index));
                        }
                    }
                    _ => {}
                }
            })));
            let _op = context.subscribe(InterestMaskSet::SOURCE, |_| {});
        }
        {
            let queue = queue.clone();
            let _op = context.introspect().get_source_info_list(move |result| {
                if let ListResult::Item(info) = result {
                    push_card(&queue, info);
                }
            });
        }

        let mut chosen: Option<u32> = None;
        loop {
            match mainloop.iterate(true) {
                IterateResult::Success(_) => {}
                IterateResult::Err(e) => {
                    eprintln!("mainloop error: {e}");
                    return 1;
                }
                IterateResult::Quit(_) => return 1,
            }
            if interrupted.load(Ordering::SeqCst) {
                tracing::debug!("interrupted");
                return 1;
            }

            loop {
                let event = match queue.lock() {
                    Ok(mut q) => q.pop_front(),
                    Err(_) => None,
                };
                let Some(event) = event else { break };
                match event {
                    SourceEvent::Card(card) => {
                        tracing::debug!("source: index={}", card.index);
                        if chosen.is_none() && selector.accepts(&card) {
                            chosen = Some(card.index);
                            tracing::debug!("choosing source: {}", card.index);
                            println!("pulse:{}", card.index);
                            if !cli.hang {
                                return 0;
                            }
                        }
                    }
                    SourceEvent::New(index) => {
                        tracing::debug!("new source: index={}", index);
                        if chosen.is_none() {
                            let queue = queue.clone();
                            let _op = context.introspect().get_source_info_by_index(
                                index,
                                move |result| {
                                    if let ListResult::Item(info) = result {
                                        push_card(&queue, info);
                                    }
                                },
                            );
                        }
                    }
                    SourceEvent::Removed(index) => {
                        if cli.hang && chosen == Some(index) {
                            tracing::debug!("chosen source has been removed: index={}", index);
                            return 0;
                        }
                    }
                }
            }
        }
    }
}

fn main() {
    earshot::init_logging();
    let cli = Cli::parse();

    #[cfg(target_os = "linux")]
    std::process::exit(run::run(cli));

    #[cfg(not(target_os = "linux"))]
    {
        let _ = cli;
        eprintln!("pick-source requires PulseAudio and is only available on Linux");
        std::process::exit(1);
    }
}
