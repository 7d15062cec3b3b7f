//! Scripted payroll run against the in-memory ledger.
//!
//! Opens a treasury and a ten-day stream, advances a simulated clock day by
//! day with a pause in the middle, and prints both dashboards as JSON lines.

use std::sync::Arc;

use anyhow::Context;

use wagestream_client::{ClientConfig, InMemoryLedger, LedgerMirror, NewStream};
use wagestream_core::{AccountId, Clock, ManualClock, SECONDS_PER_DAY, Session, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wagestream_observability::init();

    let config = ClientConfig::from_env();
    tracing::info!(?config, "starting payroll simulation");

    // Simulated days count forward from the real current time.
    let clock = ManualClock::new(SystemClock.now());
    let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
    let mirror = LedgerMirror::new(ledger, clock.clone(), config);

    let employer = Session::employer(AccountId::parse("acme").context("employer id")?);
    let employee = Session::employee(AccountId::parse("alice").context("employee id")?);

    mirror
        .initialize_treasury(&employer, 10_000)
        .await
        .context("initialize treasury")?;
    let confirmation = mirror
        .create_stream(
            &employer,
            NewStream {
                employee: employee.account().clone(),
                total_amount: 8_640,
                duration_seconds: 10 * SECONDS_PER_DAY,
                description: "engineering".to_string(),
            },
        )
        .await
        .context("create stream")?;
    let stream_id = confirmation
        .stream_id
        .context("ledger did not report the new stream id")?;

    mirror.load_account(employee.account()).await?;

    for day in 1..=12 {
        clock.advance(SECONDS_PER_DAY);
        match day {
            4 => {
                mirror.pause_stream(&employer, stream_id).await?;
            }
            6 => {
                mirror.resume_stream(&employer, stream_id).await?;
            }
            _ => {}
        }
        if day % 3 == 0 || day == 12 {
            mirror
                .withdraw_wages(&employee, stream_id)
                .await
                .with_context(|| format!("withdraw on day {day}"))?;
        }

        println!(
            "{}",
            serde_json::to_string(&mirror.employee_dashboard(&employee)?)?
        );
    }

    println!(
        "{}",
        serde_json::to_string(&mirror.employer_dashboard(&employer)?)?
    );
    print!("{}", mirror.journal().export_json_lines()?);
    Ok(())
}
