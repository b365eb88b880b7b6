// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Analyze a startup idea and stream the agents' conversation to stdout.
//!
//! ```text
//! VCAI_BACKEND_URL=http://localhost:8000 \
//!     cargo run --example analyze -- "Meal kits for shift workers" --file deck.pdf
//! ```
//!
//! Pass `--simulate` to replay canned conversations without a backend.
//! Set `RUST_LOG=vcai_session=debug` to see channel activity.

use std::collections::BTreeMap;
use vcai_session::{
    AgentTrack, AnalysisClient, AnalysisRequest, Attachment, SessionStatus, SessionUpdate,
    SimulatedBackend, SimulationPacing,
};

#[tokio::main]
async fn main() -> vcai_session::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vcai_session=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut prompt = Vec::new();
    let mut files = Vec::new();
    let mut simulate = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--file" => match args.next() {
                Some(path) => files.push(Attachment::from_path(path).await?),
                None => {
                    eprintln!("--file needs a path");
                    std::process::exit(2);
                }
            },
            "--simulate" => simulate = true,
            _ => prompt.push(arg),
        }
    }
    if prompt.is_empty() {
        eprintln!("usage: analyze <idea...> [--file <path>]... [--simulate]");
        std::process::exit(2);
    }

    println!("=== VCAI Startup Analysis ===\n");

    let session = if simulate {
        SimulatedBackend::new(SimulationPacing::default()).create_session()
    } else {
        AnalysisClient::from_env()?.create_session()
    };
    let mut updates = session.subscribe();

    let mut request = AnalysisRequest::new(prompt.join(" "));
    request.files = files;
    session.start_analysis(request).await?;
    println!(
        "Conversation: {}\n",
        session.conversation_id().await.unwrap_or_default()
    );

    // Print each message once, as it arrives
    let mut printed: BTreeMap<AgentTrack, usize> = BTreeMap::new();
    while let Ok(update) = updates.recv().await {
        match update {
            SessionUpdate::State(state) => {
                for track in AgentTrack::ALL {
                    let seen = printed.entry(track).or_default();
                    for message in state.messages(track).get(*seen..).unwrap_or_default() {
                        println!("[{}] {}\n", message.avatar(), message.text);
                    }
                    *seen = state.messages(track).len();
                }
            }
            SessionUpdate::Status(SessionStatus::Errored) => {
                let state = session.state().await;
                eprintln!(
                    "Analysis failed: {}",
                    state.last_error.unwrap_or_default()
                );
                break;
            }
            SessionUpdate::Completed(done) => {
                println!("=== Complete ===");
                if let Some(report) = done.final_report.and_then(|r| r.to_success_report()) {
                    println!(
                        "Score: {:.0}/100 ({:?})",
                        report.overall_score, report.recommendation
                    );
                    if !report.summary.is_empty() {
                        println!("{}", report.summary);
                    }
                }
                break;
            }
            SessionUpdate::Status(status) => println!("-- {status:?} --\n"),
        }
    }

    session.reset_analysis().await;
    Ok(())
}
