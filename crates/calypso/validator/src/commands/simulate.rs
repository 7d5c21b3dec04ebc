//! Reference scenarios on the virtual back-end

use std::time::Duration;

use eyre::WrapErr;
use tracing::info;
use validator_apdu_reader::sim::{VirtualBackend, VirtualCard};
use validator_app::{Status, Validator, ValidatorConfig};
use validator_calypso::sim;

/// Upper bound on the wait for one result
const RESULT_TIMEOUT: Duration = Duration::from_secs(5);

struct Scenario {
    name: &'static str,
    card: VirtualCard,
    expected: Status,
}

fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "empty counter card",
            card: sim::blank_card([0, 0, 0, 0, 0, 0, 0, 1]),
            expected: Status::EmptyCard,
        },
        Scenario {
            name: "counter card with 3 tickets",
            card: sim::counter_card([0, 0, 0, 0, 0, 0, 0, 2], "John Smith", 3),
            expected: Status::TicketsFound,
        },
        Scenario {
            name: "season contract card",
            card: sim::season_card([0, 0, 0, 0, 0, 0, 0, 3], "Harry Potter", "1 MONTH SEASON TICKET"),
            expected: Status::TicketsFound,
        },
        Scenario {
            name: "banking card",
            card: sim::banking_card([0, 0, 0, 0, 0, 0, 0, 4]),
            expected: Status::InvalidCard,
        },
    ]
}

/// Present each reference card once and print the result
///
/// Always runs on the virtual back-end, whatever the configured one.
pub(crate) fn simulate_command(config: &ValidatorConfig) -> eyre::Result<()> {
    let backend = VirtualBackend::new();
    let reader = backend.reader();
    let validator = Validator::start(backend, config)?;

    let mut failures = 0;
    for scenario in scenarios() {
        reader.insert_card(scenario.card);
        let response = validator
            .responses()
            .recv_timeout(RESULT_TIMEOUT)
            .wrap_err_with(|| format!("no result for the {} scenario", scenario.name))?;
        reader.remove_card();

        let verdict = if response.status == scenario.expected {
            "ok"
        } else {
            failures += 1;
            "UNEXPECTED"
        };
        println!("{:<28} {verdict:<10} {}", scenario.name, serde_json::to_string(&response)?);
    }

    validator.shutdown();
    info!(failures, "Simulation done");
    if failures > 0 {
        eyre::bail!("{failures} scenario(s) gave an unexpected result");
    }
    Ok(())
}
