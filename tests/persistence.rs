//! Snapshot round-trips and append-only file replay.
//!
//! These drive the command path through a detached client, so persistence
//! sees exactly the state a socket-fed server would build.

use bytes::Bytes;
use mio::Token;
use tempfile::TempDir;

use oxidis::client::Client;
use oxidis::config::Config;
use oxidis::db::Db;
use oxidis::object::{Object, ObjType};
use oxidis::rdb;
use oxidis::reactor::now_ms;
use oxidis::server::Server;

const TEST_CLIENT: Token = Token(9);

fn test_config(dir: &TempDir, appendonly: bool) -> Config {
    let mut config = Config::default();
    config.port = 0;
    config.appendonly = appendonly;
    config.appendfilename = dir
        .path()
        .join("appendonly.aof")
        .to_string_lossy()
        .into_owned();
    config.dbfilename = dir.path().join("dump.rdb").to_string_lossy().into_owned();
    config
}

fn server_with_client(config: Config) -> Server {
    let mut server = Server::new(config).expect("bind server");
    server.clients.insert(TEST_CLIENT, Client::detached(TEST_CLIENT));
    server
}

fn run(server: &mut Server, parts: &[&str]) {
    if let Some(client) = server.clients.get_mut(&TEST_CLIENT) {
        client.args = parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
    }
    server.process_command(TEST_CLIENT);
}

fn seed(server: &mut Server) {
    run(server, &["SET", "greeting", "hello"]);
    run(server, &["SET", "counter", "41"]);
    run(server, &["INCR", "counter"]);
    run(server, &["RPUSH", "fruits", "apple", "banana", "cherry"]);
    run(server, &["SADD", "tags", "red", "green", "blue"]);
    run(server, &["HSET", "profile", "name", "ada", "lang", "rust"]);
    run(server, &["ZADD", "board", "1.5", "low", "9", "high", "4", "mid"]);
    run(server, &["SET", "doomed", "bye"]);
    run(server, &["DEL", "doomed"]);
    run(server, &["SET", "volatile", "v"]);
    run(server, &["EXPIRE", "volatile", "1000"]);
}

fn assert_seeded(db: &mut Db) {
    let now = now_ms();

    let greeting = db.lookup_read(b"greeting", now).expect("greeting");
    assert_eq!(greeting.str_bytes().unwrap().as_ref(), b"hello");

    let counter = db.lookup_read(b"counter", now).expect("counter");
    assert_eq!(counter.int_value(), Some(42));

    let fruits = db.lookup_read(b"fruits", now).expect("fruits");
    assert_eq!(fruits.obj_type(), ObjType::List);
    if let Object::List(list) = &*fruits {
        let names: Vec<Vec<u8>> = list.borrow().iter().map(|b| b.to_vec()).collect();
        assert_eq!(names, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
    }

    let tags = db.lookup_read(b"tags", now).expect("tags");
    if let Object::Set(set) = &*tags {
        let mut set = set.borrow_mut();
        assert_eq!(set.len(), 3);
        assert!(set.contains(b"red"));
        assert!(set.contains(b"green"));
        assert!(set.contains(b"blue"));
    }

    let profile = db.lookup_read(b"profile", now).expect("profile");
    if let Object::Hash(hash) = &*profile {
        let mut hash = hash.borrow_mut();
        assert_eq!(hash.get(b"name").map(|v| v.to_vec()), Some(b"ada".to_vec()));
        assert_eq!(hash.get(b"lang").map(|v| v.to_vec()), Some(b"rust".to_vec()));
    }

    let board = db.lookup_read(b"board", now).expect("board");
    if let Object::ZSet(zset) = &*board {
        let mut zset = zset.borrow_mut();
        assert_eq!(zset.len(), 3);
        assert_eq!(zset.score(b"low"), Some(1.5));
        assert_eq!(zset.score(b"mid"), Some(4.0));
        assert_eq!(zset.score(b"high"), Some(9.0));
        assert_eq!(zset.rank(b"high", false), Some(2));
    }

    assert!(db.lookup_read(b"doomed", now).is_none());

    assert!(db.lookup_read(b"volatile", now).is_some());
    assert!(db.expire_time(b"volatile").expect("volatile deadline") > now);
}

#[test]
fn rdb_round_trip_preserves_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server_with_client(test_config(&dir, false));
    seed(&mut server);

    let path = server.config.dbfilename.clone();
    rdb::save(&path, &server.db).expect("save");

    let mut loaded = rdb::load(&path, now_ms()).expect("load");
    assert_eq!(loaded.len(), server.db.len());
    assert_seeded(&mut loaded);
}

#[test]
fn rdb_load_drops_already_expired_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.rdb").to_string_lossy().into_owned();

    let mut db = Db::new();
    db.set(Bytes::from("fresh"), Object::string(Bytes::from("1")));
    db.set(Bytes::from("stale"), Object::string(Bytes::from("2")));
    db.set_expire(Bytes::from("stale"), now_ms() - 1);
    db.set(Bytes::from("later"), Object::string(Bytes::from("3")));
    db.set_expire(Bytes::from("later"), now_ms() + 60_000);

    rdb::save(&path, &db).expect("save");
    let mut loaded = rdb::load(&path, now_ms()).expect("load");

    assert_eq!(loaded.len(), 2);
    assert!(loaded.lookup_read(b"fresh", now_ms()).is_some());
    assert!(loaded.lookup_read(b"stale", now_ms()).is_none());
    assert!(loaded.lookup_read(b"later", now_ms()).is_some());
}

#[test]
fn save_command_resets_the_dirty_counter() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server_with_client(test_config(&dir, false));
    seed(&mut server);
    assert!(server.dirty > 0);

    run(&mut server, &["SAVE"]);
    assert_eq!(server.dirty, 0);
    assert!(std::path::Path::new(&server.config.dbfilename).exists());
}

#[test]
fn aof_replay_rebuilds_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, true);

    let mut server = server_with_client(config.clone());
    seed(&mut server);
    drop(server);

    // A fresh server replays the log on startup.
    let mut replayed = Server::new(config).expect("bind server");
    replayed.load_data();
    assert_eq!(replayed.dirty, 0);
    assert_seeded(&mut replayed.db);
}

#[test]
fn aof_rewrite_produces_an_equivalent_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, true);

    let mut server = server_with_client(config.clone());
    seed(&mut server);
    // Redundant history the rewrite should compact away.
    run(&mut server, &["SET", "greeting", "hello"]);
    run(&mut server, &["SADD", "tags", "red"]);
    run(&mut server, &["BGREWRITEAOF"]);
    drop(server);

    let mut replayed = Server::new(config).expect("bind server");
    replayed.load_data();
    assert_seeded(&mut replayed.db);
}

#[test]
fn expire_is_logged_as_an_absolute_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, true);

    let mut server = server_with_client(config.clone());
    run(&mut server, &["SET", "k", "v"]);
    run(&mut server, &["EXPIRE", "k", "1000"]);
    drop(server);

    let log = std::fs::read_to_string(&config.appendfilename).unwrap();
    assert!(log.contains("EXPIREAT"), "log should hold EXPIREAT: {log}");
    assert!(!log.to_lowercase().contains("\nexpire\r"), "relative expire leaked");
}
