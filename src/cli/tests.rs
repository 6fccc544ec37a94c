//! Unit tests for CLI commands

use crate::cli::{reverse, squares, Cli, Commands};
use crate::ConfigError;
use clap::Parser;

#[test]
fn test_reverse_command_parses() {
    let cli = Cli::try_parse_from(["chanmgr", "reverse", "Hello"]).unwrap();
    match cli.command {
        Commands::Reverse { text } => assert_eq!(text, "Hello"),
        _ => panic!("Expected Reverse command"),
    }
}

#[test]
fn test_squares_command_with_flags() {
    let cli = Cli::try_parse_from([
        "chanmgr",
        "squares",
        "--count",
        "500",
        "--capacity",
        "25",
        "--json",
    ])
    .unwrap();

    match cli.command {
        Commands::Squares {
            count,
            capacity,
            json,
        } => {
            assert_eq!(count, 500);
            assert_eq!(capacity, 25);
            assert!(json);
        }
        _ => panic!("Expected Squares command"),
    }
}

#[test]
fn test_squares_defaults_and_count_range() {
    let cli = Cli::try_parse_from(["chanmgr", "squares"]).unwrap();
    match cli.command {
        Commands::Squares {
            count,
            capacity,
            json,
        } => {
            assert_eq!(count, 10_000);
            assert_eq!(capacity, 1000);
            assert!(!json);
        }
        _ => panic!("Expected Squares command"),
    }

    assert!(Cli::try_parse_from(["chanmgr", "squares", "--count", "0"]).is_err());
}

#[test]
fn test_reverse_round_trip() {
    assert_eq!(reverse("Hello").unwrap(), "olleH");
    assert_eq!(reverse("").unwrap(), "");
}

#[test]
fn test_squares_verifies_every_result() {
    let summary = squares(2_000, 16).unwrap();
    assert_eq!(summary.submitted, 2_000);
    assert_eq!(summary.verified, 2_000);
    assert_eq!(summary.mismatched, 0);
    assert_eq!(summary.queue_capacity, 16);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["verified"], 2_000);
}

#[test]
fn test_squares_rejects_bad_capacity() {
    let err = squares(10, 0).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::QueueCapacity { capacity: 0 })
    );
}
