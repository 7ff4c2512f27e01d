use std::path::Path;

use anyhow::Result;
use predicates::str::contains;
use tempfile::TempDir;

fn parley_command(parley_home: &Path) -> Result<assert_cmd::Command> {
    let mut cmd = assert_cmd::Command::cargo_bin("parley")?;
    cmd.env("PARLEY_HOME", parley_home)
        .env("PARLEY_AUTH_TOKEN", "ptk-test-token")
        .env("RUST_LOG", "parley_core=debug");
    Ok(cmd)
}

#[test]
fn quit_exits_cleanly_even_without_a_server() -> Result<()> {
    let parley_home = TempDir::new()?;

    parley_command(parley_home.path())?
        .args([
            "-c",
            "server_url=ws://127.0.0.1:9/ws/chat",
            "chat",
            "--project",
            "p1",
            "--chat",
            "c1",
            "--color",
            "never",
        ])
        .write_stdin("/help\n/quit\n")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(contains("chat c1 in project p1"))
        .stdout(contains("/reconnect"));

    assert!(parley_home.path().join("log").join("parley.log").exists());
    Ok(())
}

#[test]
fn invalid_server_url_is_rejected() -> Result<()> {
    let parley_home = TempDir::new()?;

    parley_command(parley_home.path())?
        .args([
            "-c",
            "server_url=not a url",
            "chat",
            "--project",
            "p1",
            "--chat",
            "c1",
        ])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(contains("invalid server_url"));
    Ok(())
}
