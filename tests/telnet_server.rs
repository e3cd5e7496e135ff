// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drive the telnet transport end to end over loopback sockets.
// Author: Lukas Bower

mod support;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serial_test::serial;

use embsh::{CommandOutput, CommandRegistry, ServerConfig, ShellError, TelnetServer};

use support::init_logs;

fn config(port: u16) -> ServerConfig {
    ServerConfig {
        port,
        banner: String::new(),
        ..ServerConfig::default()
    }
}

fn connect(port: u16) -> Result<TcpStream> {
    let deadline = Instant::now() + Duration::from_millis(1_000);
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return Ok(stream),
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Err(err) => return Err(err).context("connect to telnet shell"),
        }
    }
}

fn recv_for(stream: &mut TcpStream, window: Duration) -> String {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let deadline = Instant::now() + window;
    let mut data = Vec::new();
    let mut buf = [0u8; 512];
    while Instant::now() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(ref err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

fn send(stream: &mut TcpStream, text: &str) {
    let _ = stream.write_all(text.as_bytes());
}

#[test]
#[serial]
fn start_and_stop() {
    init_logs();
    let mut server = TelnetServer::new(config(23_230), CommandRegistry::new());
    server.start().unwrap();
    assert!(server.is_running());
    server.stop();
    assert!(!server.is_running());
}

#[test]
#[serial]
fn second_start_reports_already_running() {
    init_logs();
    let mut server = TelnetServer::new(config(23_231), CommandRegistry::new());
    server.start().unwrap();
    assert_eq!(server.start(), Err(ShellError::AlreadyRunning));
    server.stop();
}

#[test]
#[serial]
fn stop_when_not_running_is_safe() {
    init_logs();
    let mut server = TelnetServer::new(config(23_232), CommandRegistry::new());
    server.stop();
    assert!(!server.is_running());
}

#[test]
#[serial]
fn bound_port_reports_port_in_use() {
    init_logs();
    let _holder = TcpListener::bind(("0.0.0.0", 23_239)).unwrap();
    let mut server = TelnetServer::new(config(23_239), CommandRegistry::new());
    assert_eq!(server.start(), Err(ShellError::PortInUse));
}

#[test]
#[serial]
fn client_receives_banner_and_prompt() -> Result<()> {
    init_logs();
    let cfg = ServerConfig {
        port: 23_233,
        banner: "\r\nWelcome!\r\n".to_owned(),
        ..ServerConfig::default()
    };
    let mut server = TelnetServer::new(cfg, CommandRegistry::new());
    server.start().unwrap();

    let mut client = connect(23_233)?;
    let data = recv_for(&mut client, Duration::from_millis(1_000));
    assert!(data.contains("Welcome!"));
    assert!(data.contains("embsh> "));

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn command_executes_over_telnet() -> Result<()> {
    init_logs();
    let executed = Arc::new(AtomicBool::new(false));
    let registry = CommandRegistry::new();
    let flag = Arc::clone(&executed);
    registry
        .register("telnet_test_cmd", "test cmd", move |_: &[&str], _: &mut CommandOutput<'_>| {
            flag.store(true, Ordering::SeqCst);
            0
        })
        .unwrap();

    let mut server = TelnetServer::new(config(23_234), registry);
    server.start().unwrap();

    let mut client = connect(23_234)?;
    let _ = recv_for(&mut client, Duration::from_millis(800));

    send(&mut client, "telnet_test_cmd\r\n");
    let _ = recv_for(&mut client, Duration::from_millis(600));
    assert!(executed.load(Ordering::SeqCst));

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn exit_command_closes_session() -> Result<()> {
    init_logs();
    let mut server = TelnetServer::new(config(23_235), CommandRegistry::new());
    server.start().unwrap();

    let mut client = connect(23_235)?;
    let _ = recv_for(&mut client, Duration::from_millis(800));

    send(&mut client, "exit\r\n");
    let response = recv_for(&mut client, Duration::from_millis(600));
    assert!(response.contains("Bye"));

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn authentication_succeeds_with_correct_credentials() -> Result<()> {
    init_logs();
    let cfg = ServerConfig {
        port: 23_236,
        banner: String::new(),
        username: Some("admin".to_owned()),
        password: Some("secret".to_owned()),
        ..ServerConfig::default()
    };
    let mut server = TelnetServer::new(cfg, CommandRegistry::new());
    server.start().unwrap();

    let mut client = connect(23_236)?;
    let data = recv_for(&mut client, Duration::from_millis(1_000));
    assert!(data.contains("Username:"));

    send(&mut client, "admin\r\n");
    let data = recv_for(&mut client, Duration::from_millis(600));
    assert!(data.contains("Password:"));

    send(&mut client, "secret\r\n");
    let data = recv_for(&mut client, Duration::from_millis(600));
    assert!(data.contains("******"), "password bytes must echo as stars: {data:?}");
    assert!(data.contains("Login successful."));
    assert!(data.contains("embsh> "));

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn authentication_fails_after_three_attempts() -> Result<()> {
    init_logs();
    let cfg = ServerConfig {
        port: 23_237,
        banner: String::new(),
        username: Some("admin".to_owned()),
        password: Some("secret".to_owned()),
        ..ServerConfig::default()
    };
    let mut server = TelnetServer::new(cfg, CommandRegistry::new());
    server.start().unwrap();

    let mut client = connect(23_237)?;
    let _ = recv_for(&mut client, Duration::from_millis(800));

    let mut transcript = String::new();
    for _ in 0..3 {
        send(&mut client, "wrong\r\n");
        transcript.push_str(&recv_for(&mut client, Duration::from_millis(400)));
        send(&mut client, "wrong\r\n");
        transcript.push_str(&recv_for(&mut client, Duration::from_millis(400)));
    }
    assert!(transcript.contains("Invalid credentials. Try again."));
    assert!(transcript.contains("Authentication failed."));

    // The server half-closed the connection; reads drain to EOF.
    let mut buf = [0u8; 64];
    let _ = client.set_read_timeout(Some(Duration::from_millis(500)));
    loop {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn extra_connection_is_rejected_when_full() -> Result<()> {
    init_logs();
    let cfg = ServerConfig {
        port: 23_238,
        max_sessions: 1,
        banner: String::new(),
        ..ServerConfig::default()
    };
    let mut server = TelnetServer::new(cfg, CommandRegistry::new());
    server.start().unwrap();

    let mut first = connect(23_238)?;
    let _ = recv_for(&mut first, Duration::from_millis(800));

    let mut second = connect(23_238)?;
    let data = recv_for(&mut second, Duration::from_millis(1_000));
    assert!(data.contains("Too many connections."));

    server.stop();
    Ok(())
}
