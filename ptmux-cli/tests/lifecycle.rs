use std::time::Duration;

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

/// Detaching every client attached to a session leaves it alive; a fresh
/// attach afterwards still succeeds. Only an explicit `kill` removes a
/// session from the registry.
#[test]
fn detaching_all_clients_keeps_the_session_alive() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client = daemon.client()?;

    let created = client.create_session(sleepy_session("survives-detach"))?;

    client.attach(&created.id)?;
    client.detach(&created.id)?;
    // detach is idempotent
    client.detach(&created.id)?;

    let sessions = client.list_sessions()?;
    assert!(sessions.iter().any(|s| s.id == created.id && s.alive));

    let reattached = client.attach(&created.id)?;
    assert!(reattached.alive);

    client.kill_session(&created.id, None)?;
    let sessions = client.list_sessions()?;
    assert!(!sessions.iter().any(|s| s.id == created.id));

    Ok(())
}

/// A raw (non-library) client that attaches and then simply closes its
/// socket does not kill the session it was attached to -- only `kill`
/// does. This distinguishes "disconnect" from "kill" at the transport
/// level, independent of the client library's own reconnect behavior.
#[test]
fn raw_client_disconnect_does_not_kill_its_session() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;

    let created_id = {
        let mut stream = support::raw::connect(&daemon.socket_path)?;
        let resp = support::raw::request(
            &mut stream,
            1,
            ptmuxd::protocol::RequestOp::Create {
                name: "orphaned".into(),
                cols: 80,
                rows: 24,
                cwd: None,
                argv: Some(vec!["/bin/sh".into(), "-c".into(), "sleep 5".into()]),
                env: None,
            },
        )?;
        let created: ptmuxd::protocol::CreateResult = resp.into_result()?;

        let resp = support::raw::request(
            &mut stream,
            2,
            ptmuxd::protocol::RequestOp::Attach { id: created.id.clone() },
        )?;
        let attach_result: ptmuxd::protocol::AttachResult = resp.into_result()?;
        let _snapshot = support::raw::read_binary(&mut stream, attach_result.history_len)?;

        created.id
        // `stream` is dropped here, closing the connection from our end.
    };

    let client = daemon.client()?;
    let sessions = support::wait_for(Duration::from_secs(2), || {
        let sessions = client.list_sessions().ok()?;
        if sessions.iter().any(|s| s.id == created_id) {
            Some(sessions)
        } else {
            None
        }
    });
    let found = sessions.iter().find(|s| s.id == created_id).unwrap();
    assert!(found.alive, "session should survive its only client disconnecting");

    client.kill_session(&created_id, None)?;
    Ok(())
}

/// Killing a session removes it from the registry even while clients
/// remain attached; those clients see an exit event, not a hang.
#[test]
fn kill_removes_session_from_list() -> anyhow::Result<()> {
    let daemon = support::DaemonProc::new()?;
    let client = daemon.client()?;

    let created = client.create_session(sleepy_session("to-be-killed"))?;
    client.attach(&created.id)?;

    client.kill_session(&created.id, None)?;

    let sessions = client.list_sessions()?;
    assert!(!sessions.iter().any(|s| s.id == created.id));

    Ok(())
}
