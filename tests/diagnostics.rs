//! Diagnostics IPC against an in-process fake runtime.
//!
//! The fake speaks the runtime side of the protocol: it advertises itself on the reverse
//! port, accepts `CollectTracing2`, answers `ResumeRuntime` on a second connection and then
//! streams a nettrace document over the session connection.
#![cfg(unix)]

use std::{
    io::Write,
    os::unix::net::{UnixListener, UnixStream},
    path::Path,
    thread,
    time::Duration,
};

use dotslim::{
    diagnostics::{
        ipc::{command_set, event_pipe, process, server},
        DiagnosticsClient, IpcMessage, ReverseServer, SessionConfig,
    },
    prelude::*,
    trace::events::RUNTIME_PROVIDER,
};

#[allow(dead_code)]
#[path = "../src/test/nettrace.rs"]
mod nettrace;

use nettrace::{NettraceWriter, TestEvent, TestPayload};

const SESSION_ID: u64 = 0x5EED;

fn trace() -> Vec<u8> {
    NettraceWriter::new()
        .event(TestEvent::new(
            RUNTIME_PROVIDER,
            152,
            TestPayload::module_load("/app/App.dll"),
        ))
        .event(TestEvent::new(
            RUNTIME_PROVIDER,
            74,
            TestPayload::type_load_stop("App.Program"),
        ))
        .finish()
}

fn advertise(stream: &mut UnixStream, pid: u64) {
    let mut message = Vec::with_capacity(34);
    message.extend_from_slice(b"ADVR_V1\0");
    message.extend_from_slice(&[0xAB; 16]);
    message.extend_from_slice(&pid.to_le_bytes());
    message.extend_from_slice(&0u16.to_le_bytes());
    stream.write_all(&message).unwrap();
}

fn respond_ok(stream: &mut UnixStream, payload: Vec<u8>) {
    IpcMessage::new(command_set::SERVER, server::OK, payload)
        .write_to(stream)
        .unwrap();
}

fn expect_collect_tracing(stream: &mut UnixStream) {
    let command = IpcMessage::read_from(stream).unwrap();
    assert_eq!(command.command_set, command_set::EVENT_PIPE);
    assert_eq!(command.command_id, event_pipe::COLLECT_TRACING_2);
    respond_ok(stream, SESSION_ID.to_le_bytes().to_vec());
}

fn fake_reverse_runtime(path: &Path, pid: u64) -> thread::JoinHandle<()> {
    let path = path.to_path_buf();
    thread::spawn(move || {
        let mut session = UnixStream::connect(&path).unwrap();
        advertise(&mut session, pid);
        expect_collect_tracing(&mut session);

        let mut control = UnixStream::connect(&path).unwrap();
        advertise(&mut control, pid);
        let command = IpcMessage::read_from(&mut control).unwrap();
        assert_eq!(command.command_set, command_set::PROCESS);
        assert_eq!(command.command_id, process::RESUME_RUNTIME);
        respond_ok(&mut control, 0u32.to_le_bytes().to_vec());

        session.write_all(&trace()).unwrap();
    })
}

#[test]
fn launched_process_is_traced_from_startup() {
    let server = ReverseServer::bind().unwrap();
    let target = Launcher::new("sleep").arg("1").spawn_suspended(&server).unwrap();
    let runtime = fake_reverse_runtime(server.path(), u64::from(target.pid()));

    let mut usage = Usage::default();
    let config = SessionConfig::default().with_connect_timeout(Duration::from_secs(10));
    let summary = TraceCollector::new(&mut usage)
        .launched(&target, &server, &config)
        .unwrap();
    runtime.join().unwrap();

    assert_eq!(summary.events, 2);
    assert!(usage.contains_module(Path::new("/app/App.dll")));
    assert!(usage.contains_type("App.Program"));
    assert!(!target.is_running());
}

#[test]
fn process_exiting_without_connecting_fails() {
    let server = ReverseServer::bind().unwrap();
    let target = Launcher::new("true").spawn_suspended(&server).unwrap();

    let mut usage = Usage::default();
    let result = TraceCollector::new(&mut usage).launched(
        &target,
        &server,
        &SessionConfig::default().with_connect_timeout(Duration::from_secs(10)),
    );

    assert!(result.is_err());
    assert!(usage.is_empty());
}

#[test]
fn attaches_through_the_default_socket() {
    let dir = tempfile::tempdir().unwrap();
    let listener =
        UnixListener::bind(dir.path().join("dotnet-diagnostic-4242-1700000000-socket")).unwrap();

    let runtime = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        expect_collect_tracing(&mut stream);
        stream.write_all(&trace()).unwrap();
    });

    let session = DiagnosticsClient::new(4242)
        .with_socket_dir(dir.path())
        .start_session(&SessionConfig::default())
        .unwrap();
    assert_eq!(session.session_id(), SESSION_ID);

    let mut usage = Usage::default();
    let summary = TraceCollector::new(&mut usage).consume(session).unwrap();
    runtime.join().unwrap();

    assert_eq!(summary.process_id, Some(4242));
    assert!(usage.contains_type("App.Program"));
}

#[test]
fn rejected_session_reports_hresult() {
    let dir = tempfile::tempdir().unwrap();
    let listener =
        UnixListener::bind(dir.path().join("dotnet-diagnostic-77-1700000000-socket")).unwrap();

    let runtime = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        IpcMessage::read_from(&mut stream).unwrap();
        IpcMessage::new(
            command_set::SERVER,
            server::ERROR,
            0x8013_1384u32.to_le_bytes().to_vec(),
        )
        .write_to(&mut stream)
        .unwrap();
    });

    let result = DiagnosticsClient::new(77)
        .with_socket_dir(dir.path())
        .start_session(&SessionConfig::default());
    runtime.join().unwrap();

    assert!(matches!(
        result,
        Err(Error::Ipc {
            hresult: 0x8013_1384
        })
    ));
}
