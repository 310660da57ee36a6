//! Tests for the simulate command.

use super::parse;
use crate::cli::CliCommand;
use opguard_core::ErrorCategory;
use std::time::Duration;

#[test]
fn cli_parse_simulate_defaults() {
    match parse(&["opguard", "simulate", "data"]) {
        CliCommand::Simulate(args) => {
            assert_eq!(args.category, ErrorCategory::Data);
            assert_eq!(args.failures, 2);
            assert_eq!(args.status, 503);
            assert!(args.code.is_none());
            assert!(!args.json);
            let o = args.overrides();
            assert!(o.max_attempts.is_none());
            assert_eq!(o.classify.context.as_deref(), Some("simulate data"));
        }
        _ => panic!("expected Simulate"),
    }
}

#[test]
fn cli_parse_simulate_overrides() {
    match parse(&[
        "opguard",
        "simulate",
        "healthcare",
        "--failures",
        "5",
        "--code",
        "NETWORK_TIMEOUT",
        "--max-attempts",
        "3",
        "--base-delay-ms",
        "10",
        "--max-delay-ms",
        "50",
        "--json",
    ]) {
        CliCommand::Simulate(args) => {
            assert_eq!(args.failures, 5);
            assert_eq!(args.code.as_deref(), Some("NETWORK_TIMEOUT"));
            let o = args.overrides();
            assert_eq!(o.max_attempts, Some(3));
            assert_eq!(o.base_delay, Some(Duration::from_millis(10)));
            assert_eq!(o.max_delay, Some(Duration::from_millis(50)));
            assert!(args.json);
        }
        _ => panic!("expected Simulate"),
    }
}
