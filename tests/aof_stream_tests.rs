// Tests for persisting and recovering the append-only propagation stream.

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use bytes::Bytes;
use emberkv::propagate::record;
use emberkv::script::LuaEngine;
use emberkv::{Error, Options, ServerState};
use tempfile::TempDir;

#[test]
fn test_aof_stream_survives_disk_round_trip() {
    let server = Rc::new(RefCell::new(ServerState::new(Options::default()).unwrap()));
    let caller = server.borrow_mut().new_client();
    let engine = LuaEngine::new(Rc::clone(&server));

    engine
        .eval(
            &caller,
            r#"
                server.call("SET", "user:1", "Alice")
                server.call("SET", "user:2", "Bob")
                server.call("DEL", "user:3")
            "#,
            &[],
            &[],
        )
        .unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("append.log");
    fs::write(&path, server.borrow().propagation().encode_aof()).unwrap();

    let recovered = record::decode_all(&fs::read(&path).unwrap()).unwrap();
    let names: Vec<String> = recovered.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["MULTI", "SET", "SET", "DEL", "EXEC"]);
    assert_eq!(recovered[1].argv[2], Bytes::from_static(b"Alice"));
}

#[test]
fn test_corrupted_aof_stream_is_rejected() {
    let server = Rc::new(RefCell::new(ServerState::new(Options::default()).unwrap()));
    let caller = server.borrow_mut().new_client();
    let engine = LuaEngine::new(Rc::clone(&server));

    engine.eval(&caller, r#"server.call("SET", "k", "v")"#, &[], &[]).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("append.log");
    let mut encoded = server.borrow().propagation().encode_aof();
    let last = encoded.len() - 1;
    encoded[last] ^= 0xFF;
    fs::write(&path, encoded).unwrap();

    match record::decode_all(&fs::read(&path).unwrap()) {
        Err(Error::ChecksumMismatch { .. }) => {}
        other => panic!("expected checksum mismatch, got {:?}", other),
    }
}
