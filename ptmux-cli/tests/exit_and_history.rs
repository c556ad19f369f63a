use std::{sync::mpsc, time::Duration};

use ptmuxd::client::CreateSessionParams;

mod support;

/// Spawn a session that prints `"hello\n"` and exits cleanly, without
/// attaching to it first. The Ring History records PTY output whether or
/// not anyone is subscribed, so this alone is enough to observe both the
/// exit and the history it left behind.
#[test]
fn exited_session_keeps_its_history_and_reports_in_list() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client = daemon.client()?;

    let created = client.create_session(CreateSessionParams {
        name: "hello".into(),
        cols: 80,
        rows: 24,
        cwd: None,
        argv: Some(vec![
            "/bin/sh".into(),
            "-c".into(),
            "stty raw -echo; printf 'hello\\n'; exit 0".into(),
        ]),
        env: None,
    })?;

    let sessions = support::wait_for(Duration::from_secs(5), || {
        let sessions = client.list_sessions().ok()?;
        let found = sessions.iter().find(|s| s.id == created.id)?.clone();
        if found.alive {
            None
        } else {
            Some(sessions)
        }
    });
    let found = sessions.iter().find(|s| s.id == created.id).unwrap();
    assert_eq!(found.exit_code, Some(0));

    let history = client.history(&created.id)?;
    assert!(history.ends_with(b"hello\n"), "history was {:?}", String::from_utf8_lossy(&history));

    Ok(())
}

/// A client attached before the child exits receives the exit event with
/// the right code, after any output the child produced.
#[test]
fn exit_event_carries_the_exit_code() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client = daemon.client()?;

    let created = client.create_session(CreateSessionParams {
        name: "delayed-exit".into(),
        cols: 80,
        rows: 24,
        cwd: None,
        argv: Some(vec!["/bin/sh".into(), "-c".into(), "sleep 0.3; exit 3".into()]),
        env: None,
    })?;

    client.attach(&created.id)?;
    let (exit_tx, exit_rx) = mpsc::channel();
    client.on_exit(&created.id, move |code| {
        let _ = exit_tx.send(code);
    });

    let code = exit_rx.recv_timeout(Duration::from_secs(5)).expect("no exit event observed");
    assert_eq!(code, 3);

    Ok(())
}

/// A `write` issued against a session that has already exited fails with
/// `session_exited`, and the connection remains usable afterwards.
#[test]
fn write_after_exit_fails_without_closing_the_connection() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client = daemon.client()?;

    let created = client.create_session(CreateSessionParams {
        name: "short-lived".into(),
        cols: 80,
        rows: 24,
        cwd: None,
        argv: Some(vec!["/bin/true".into()]),
        env: None,
    })?;

    support::wait_for(Duration::from_secs(5), || {
        let sessions = client.list_sessions().ok()?;
        let found = sessions.iter().find(|s| s.id == created.id)?;
        if found.alive {
            None
        } else {
            Some(())
        }
    });

    let err = client.write_input(&created.id, b"echo hi\n").unwrap_err();
    assert!(err.to_string().contains("session_exited"), "error was: {err}");

    // the connection is still usable for other operations
    assert!(client.list_sessions().is_ok());

    Ok(())
}
