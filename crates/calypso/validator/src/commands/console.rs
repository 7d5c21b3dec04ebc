//! Operator console: results as JSON lines on stdout, commands on stdin

use std::io::{self, BufRead};
use std::thread;

use clap::ValueEnum;
use crossbeam_channel::Receiver;
use tracing::{info, warn};
use validator_apdu_reader::sim::{VirtualBackend, VirtualCard, VirtualReader};
use validator_app::{BackendKind, CardReaderResponse, Profile, Validator, ValidatorConfig};
use validator_calypso::sim;

use super::backend::start_pcsc;

const HELP: &str = "\
commands:
  load <n>                       load n tickets (0 renews a season pass)
  contract                       load a season ticket contract
  perso <counter-card|season-pass>
  insert <counter [n]|season|blank|bank|navigo|mifare>   virtual back-end only
  remove                         virtual back-end only
  help
  quit";

/// Cards the console can put on the virtual reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardKind {
    Counter(u32),
    Season,
    Blank,
    Bank,
    Navigo,
    Mifare,
}

/// Personalization profile as typed on the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProfileArg {
    CounterCard,
    SeasonPass,
}

impl From<ProfileArg> for Profile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::CounterCard => Self::CounterCard,
            ProfileArg::SeasonPass => Self::SeasonPass,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Load(u32),
    Contract,
    Personalize(Profile),
    Insert(CardKind),
    Remove,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or("help");
    let argument = words.next();

    let count = |argument: Option<&str>, default: Option<u32>| match argument {
        Some(n) => n.parse::<u32>().map_err(|e| format!("invalid count {n:?}: {e}")),
        None => default.ok_or_else(|| "missing count".to_string()),
    };

    match command {
        "load" => count(argument, None).map(ConsoleCommand::Load),
        "contract" => Ok(ConsoleCommand::Contract),
        "perso" => ProfileArg::from_str(argument.unwrap_or_default(), true)
            .map(|profile| ConsoleCommand::Personalize(profile.into())),
        "insert" => {
            let kind = match argument.unwrap_or("counter") {
                "counter" => CardKind::Counter(count(words.next(), Some(3))?),
                "season" => CardKind::Season,
                "blank" => CardKind::Blank,
                "bank" => CardKind::Bank,
                "navigo" => CardKind::Navigo,
                "mifare" => CardKind::Mifare,
                other => return Err(format!("unknown card {other:?}")),
            };
            Ok(ConsoleCommand::Insert(kind))
        }
        "remove" => Ok(ConsoleCommand::Remove),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(format!("unknown command {other:?}")),
    }
}

fn make_card(kind: CardKind, serial: [u8; 8]) -> VirtualCard {
    match kind {
        CardKind::Counter(tickets) => sim::counter_card(serial, "John Smith", tickets),
        CardKind::Season => sim::season_card(serial, "Harry Potter", "1 MONTH SEASON TICKET"),
        CardKind::Blank => sim::blank_card(serial),
        CardKind::Bank => sim::banking_card(serial),
        CardKind::Navigo => sim::navigo_card(serial),
        CardKind::Mifare => sim::mifare_card(),
    }
}

fn print_responses(responses: &Receiver<CardReaderResponse>) {
    for response in responses {
        match serde_json::to_string(&response) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Failed to encode a result"),
        }
    }
}

/// Run the validator until `quit` or the end of stdin
pub(crate) fn run_command(config: &ValidatorConfig) -> eyre::Result<()> {
    let (validator, reader) = match config.backend {
        BackendKind::Virtual => {
            let backend = VirtualBackend::new();
            let reader = backend.reader();
            (Validator::start(backend, config)?, Some(reader))
        }
        BackendKind::Pcsc => (start_pcsc(config)?, None),
    };

    let responses = validator.responses().clone();
    let printer = thread::Builder::new()
        .name("validator-results".to_string())
        .spawn(move || print_responses(&responses))?;

    let result = console(&validator, reader.as_ref());
    validator.shutdown();
    if printer.join().is_err() {
        warn!("Result printer panicked");
    }
    result
}

fn console(validator: &Validator, reader: Option<&VirtualReader>) -> eyre::Result<()> {
    info!(po_reader = validator.po_reader(), sam_reader = ?validator.sam_reader(), "Ready, type `help` for commands");
    let mut serial: u64 = 0;

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Load(count) => {
                let status = validator.load_tickets(count)?;
                info!(count, %status, "Load tickets");
            }
            ConsoleCommand::Contract => {
                let status = validator.load_contract()?;
                info!(%status, "Load contract");
            }
            ConsoleCommand::Personalize(profile) => {
                let status = validator.personalize(profile)?;
                info!(?profile, %status, "Personalize");
            }
            ConsoleCommand::Insert(kind) => match reader {
                Some(reader) => {
                    if reader.has_card() {
                        reader.remove_card();
                    }
                    serial += 1;
                    reader.insert_card(make_card(kind, serial.to_be_bytes()));
                }
                None => eprintln!("cards can only be inserted on the virtual back-end"),
            },
            ConsoleCommand::Remove => match reader {
                Some(reader) => {
                    reader.remove_card();
                }
                None => eprintln!("cards can only be removed on the virtual back-end"),
            },
            ConsoleCommand::Help => eprintln!("{HELP}"),
            ConsoleCommand::Quit => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_commands() {
        assert_eq!(parse_command("load 5"), Ok(ConsoleCommand::Load(5)));
        assert_eq!(
            parse_command("perso season-pass"),
            Ok(ConsoleCommand::Personalize(Profile::SeasonPass))
        );
        assert_eq!(
            parse_command("insert counter"),
            Ok(ConsoleCommand::Insert(CardKind::Counter(3)))
        );
        assert_eq!(
            parse_command("insert counter 7"),
            Ok(ConsoleCommand::Insert(CardKind::Counter(7)))
        );
        assert_eq!(parse_command("insert bank"), Ok(ConsoleCommand::Insert(CardKind::Bank)));
        assert_eq!(
            parse_command("perso counter-card"),
            Ok(ConsoleCommand::Personalize(Profile::CounterCard))
        );
        assert!(parse_command("perso gold").is_err());
        assert!(parse_command("load").is_err());
        assert!(parse_command("load many").is_err());
        assert!(parse_command("insert bus-pass").is_err());
    }
}
