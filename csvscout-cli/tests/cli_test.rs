use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn csvscout() -> Command {
    Command::cargo_bin("csvscout").unwrap()
}

#[test]
fn test_single_lane_counts_matches() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("calls.csv");
    fs::write(&path, "id,call description\n1,hello world\n2,goodbye\n")?;

    csvscout()
        .arg(&path)
        .args(["-f", "call description", "-p", "hello", "--single-lane"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 occurrences of hello"))
        .stdout(predicate::str::contains("Processing complete"))
        .stdout(predicate::str::contains("2 records"));
    Ok(())
}

#[test]
fn test_parallel_reports_workers() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("calls.csv");
    let mut contents = String::from("id,call description\n");
    for i in 0..20 {
        contents.push_str(&format!("{},hello number {}\n", i, i));
    }
    fs::write(&path, contents)?;

    csvscout()
        .arg(&path)
        .args(["-f", "call description", "-p", "hello", "-j", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Worker 1:"))
        .stdout(predicate::str::contains("Worker 2:"))
        .stdout(predicate::str::contains("Found 20 total"));
    Ok(())
}

#[test]
fn test_literal_pattern_is_escaped() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("calls.csv");
    fs::write(&path, "id,name\n1,a.c\n2,abc\n")?;

    // Literal "a.c" must not match "abc".
    csvscout()
        .arg(&path)
        .args(["-f", "name", "-p", "a.c", "--single-lane"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 total"));
    Ok(())
}

#[test]
fn test_invalid_regex_fails_up_front() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("calls.csv");
    fs::write(&path, "id,name\n1,alice\n")?;

    csvscout()
        .arg(&path)
        .args(["-f", "name", "-p", "[unclosed", "-r", "--single-lane"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid pattern"));
    Ok(())
}

#[test]
fn test_no_data_lines_warns() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.csv");
    fs::write(&path, "id,name\n")?;

    csvscout()
        .arg(&path)
        .args(["-f", "name", "-p", "x", "-j", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No data lines"));
    Ok(())
}

#[test]
fn test_json_event_stream() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("calls.csv");
    fs::write(&path, "id,name\n1,alice\n2,bob\n")?;

    csvscout()
        .arg(&path)
        .args(["-f", "name", "-p", "alice", "-j", "2", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""event":"progress""#))
        .stdout(predicate::str::contains(r#""event":"done""#))
        .stdout(predicate::str::contains(r#""outcome":"completed""#));
    Ok(())
}

#[test]
fn test_missing_file_fails() -> Result<()> {
    csvscout()
        .args(["no_such.csv", "-f", "name", "-p", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("File not found"));
    Ok(())
}

#[test]
fn test_custom_delimiter() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("calls.csv");
    fs::write(&path, "id;name\n1;alice\n")?;

    csvscout()
        .arg(&path)
        .args(["-f", "name", "-p", "alice", "-d", ";", "--single-lane"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 total"));
    Ok(())
}
