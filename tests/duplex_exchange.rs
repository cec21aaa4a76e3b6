//! Full-duplex exchange over a real TCP socket: the server task speaks
//! upload-pack on one end while the client negotiates on the other, the way
//! the git and ssh transports run.

mod util;

use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;

use git_wire::protocol::advertise::AdvertisedRefs;
use git_wire::protocol::negotiate::{fetch_pack, negotiate_read, negotiate_write};
use git_wire::protocol::pktline::PktReader;
use git_wire::protocol::upload_pack::{ServeOptions, upload_pack};
use git_wire::protocol::ProtocolVersion;
use git_wire::protocol::request::FetchRequest;
use git_wire::storage::{MemoryStorage, ObjectStore, ShallowStore};

/// A complete fetch over one live socket: advertisement, negotiation with
/// the flush after haves, shallow-free answer, pack transfer.
#[test]
fn full_duplex_fetch_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().unwrap();

    let server_thread = thread::spawn(move || {
        let server = MemoryStorage::default();
        let commits = util::seed_linear_repo(&server, 3);
        let (stream, _) = listener.accept().expect("accept");
        let mut read_half = stream.try_clone().expect("clone");
        let mut write_half = stream;
        upload_pack(
            &server,
            &mut read_half,
            &mut write_half,
            &ServeOptions::default(),
        )
        .expect("serve upload-pack");
        commits
    });

    let client = MemoryStorage::default();
    let stream = TcpStream::connect(address).expect("connect");
    let mut read_half = stream.try_clone().expect("clone");
    let mut write_half = stream.try_clone().expect("clone");

    // Handshake: the advertisement comes first on a full-duplex channel.
    let ad = {
        let mut packets = PktReader::new(&mut read_half);
        AdvertisedRefs::decode(client.hash_kind(), &mut packets).expect("advertisement")
    };
    assert_eq!(ad.version, None, "v0 advertisement carries no version line");
    let tip = *ad.refs.get("refs/heads/master").expect("master advertised");

    let mut req = FetchRequest::default();
    req.wants.insert(tip);
    let caps = negotiate_write(&ad.capabilities, false, false, &req, &mut write_half)
        .expect("negotiation written")
        .expect("not a no-change fetch");
    stream.shutdown(Shutdown::Write).expect("close write half");

    let shallow = negotiate_read(&mut read_half, false).expect("acks");
    assert!(shallow.is_empty());
    fetch_pack(&client, &caps, None, &shallow, &mut read_half).expect("pack ingested");

    let commits = server_thread.join().expect("server completed");
    for commit in commits {
        assert!(client.has_encoded_object(&commit).unwrap());
    }
    assert!(client.shallow().unwrap().is_empty());
}

/// A v1 exchange: the server opens with `version 1` when GIT_PROTOCOL asks
/// for it, and the client records it during discovery.
#[test]
fn version_one_advertisement_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().unwrap();

    let server_thread = thread::spawn(move || {
        let server = MemoryStorage::default();
        util::seed_linear_repo(&server, 1);
        let (stream, _) = listener.accept().expect("accept");
        let mut read_half = stream.try_clone().expect("clone");
        let mut write_half = stream;
        let opts = ServeOptions {
            git_protocol: Some("version=1".to_string()),
            ..ServeOptions::default()
        };
        upload_pack(&server, &mut read_half, &mut write_half, &opts).expect("serve");
    });

    let client = MemoryStorage::default();
    let stream = TcpStream::connect(address).expect("connect");
    let mut read_half = stream.try_clone().expect("clone");

    let ad = {
        let mut packets = PktReader::new(&mut read_half);
        AdvertisedRefs::decode(client.hash_kind(), &mut packets).expect("advertisement")
    };
    assert_eq!(ad.version, Some(ProtocolVersion::V1.number()));

    // Nothing wanted: hang up with a flush, which the server accepts as a
    // completed (empty) exchange.
    {
        use std::io::Write;
        let mut write_half = stream.try_clone().expect("clone");
        git_wire::protocol::pktline::write_flush(&mut write_half).expect("flush");
        write_half.flush().unwrap();
    }
    stream.shutdown(Shutdown::Write).expect("close write");
    server_thread.join().expect("server completed");
}
