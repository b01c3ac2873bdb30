use std::path::Path;

use contract_cli::{clap_command, ConfigTemplate};
use contract_config::{CatchUpAnchor, CATCH_UP_BATCH_SIZE};

fn fill(args: &[&str]) -> ConfigTemplate {
    let matches = clap_command()
        .try_get_matches_from(std::iter::once("contract-sync").chain(args.iter().copied()))
        .unwrap();
    ConfigTemplate::fill(matches).unwrap()
}

#[test]
fn defaults_run_the_service() {
    let template = fill(&[]);
    assert_eq!(template.command(), None);

    let config = template.sync_config();
    assert_eq!(config.upstream_uri.to_string(), "http://localhost:8080/");
    assert_eq!(config.effective_batch_size(), CATCH_UP_BATCH_SIZE);
    assert_eq!(config.catch_up_anchor, CatchUpAnchor::ChainHead);
    assert!(config.data_dir.is_none());
}

#[test]
fn service_options_reach_the_config() {
    let config = fill(&[
        "--server",
        "10.1.1.1",
        "--data-dir",
        "/tmp/contracts",
        "--batch-size",
        "50",
        "--anchor",
        "target",
    ])
    .sync_config();

    assert_eq!(config.upstream_uri.to_string(), "http://10.1.1.1:8080/");
    assert_eq!(config.data_dir.as_deref(), Some(Path::new("/tmp/contracts")));
    assert_eq!(config.effective_batch_size(), 50);
    assert_eq!(config.catch_up_anchor, CatchUpAnchor::IrreversibleTarget);
}

#[test]
fn command_and_params_are_collected() {
    let template = fill(&["address", "correct", "horse", "battery"]);
    assert_eq!(template.command(), Some("address"));
    assert_eq!(template.params(), ["correct", "horse", "battery"]);
}

#[test]
fn oversized_batch_is_clamped() {
    let config = fill(&["--batch-size", "5000"]).sync_config();
    assert_eq!(config.effective_batch_size(), CATCH_UP_BATCH_SIZE);
}

#[test]
fn bad_values_are_rejected() {
    assert!(clap_command()
        .try_get_matches_from(["contract-sync", "--anchor", "genesis"])
        .is_err());
    assert!(clap_command()
        .try_get_matches_from(["contract-sync", "--batch-size", "many"])
        .is_err());
}
