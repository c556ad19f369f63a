use ptmuxd::client::CreateSessionParams;

mod support;

fn sleepy_session(name: &str) -> CreateSessionParams {
    CreateSessionParams {
        name: name.to_string(),
        cols: 80,
        rows: 24,
        cwd: None,
        argv: Some(vec!["/bin/sh".into(), "-c".into(), "sleep 5".into()]),
        env: None,
    }
}

#[test]
fn create_then_list_reports_alive_session() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client = daemon.client()?;

    let created = client.create_session(sleepy_session("test-session"))?;
    assert_eq!(created.cols, 80);
    assert_eq!(created.rows, 24);

    let sessions = client.list_sessions()?;
    let found = sessions.iter().find(|s| s.id == created.id).expect("session missing from list");
    assert_eq!(found.name, "test-session");
    assert!(found.alive);
    assert_eq!(found.cols, 80);
    assert_eq!(found.rows, 24);
    assert!(found.exit_code.is_none());

    client.kill_session(&created.id, None)?;
    Ok(())
}

#[test]
fn registry_never_reuses_an_id_for_two_live_sessions() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client = daemon.client()?;

    let a = client.create_session(sleepy_session("a"))?;
    let b = client.create_session(sleepy_session("b"))?;
    assert_ne!(a.id, b.id);

    let sessions = client.list_sessions()?;
    assert_eq!(sessions.iter().filter(|s| s.id == a.id || s.id == b.id).count(), 2);

    client.kill_session(&a.id, None)?;
    client.kill_session(&b.id, None)?;
    Ok(())
}

#[test]
fn history_on_unknown_session_id_is_not_found() {
    let daemon = support::DaemonProc::new().unwrap();
    let client = daemon.client().unwrap();

    let err = client.history("does-not-exist").unwrap_err();
    assert!(err.to_string().contains("no such session"));
}

#[test]
fn attach_on_unknown_session_id_is_not_found() {
    let daemon = support::DaemonProc::new().unwrap();
    let client = daemon.client().unwrap();

    let err = client.attach("does-not-exist").unwrap_err();
    assert!(err.to_string().contains("no such session"));
}
