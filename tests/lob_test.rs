mod common;

use bytes::Bytes;
use tuple_buffer::{BufferError, LobManager};

use crate::common::new_manager;

#[test]
fn hello_world_channel() {
    let lobs = LobManager::new(new_manager(1 << 20));
    let id = lobs.create_channel("q1");

    lobs.add_chunk(id, Bytes::from_static(b"hello "), false)
        .unwrap();
    lobs.add_chunk(id, Bytes::from_static(b"world"), true)
        .unwrap();

    let (chunk, is_last) = lobs.get_chunk(id, 1).unwrap().unwrap();
    assert_eq!(&chunk[..], b"hello ");
    assert!(!is_last);

    let (chunk, is_last) = lobs.get_chunk(id, 2).unwrap().unwrap();
    assert_eq!(&chunk[..], b"world");
    assert!(is_last);

    // The last chunk has been read; the channel is spent.
    assert!(matches!(
        lobs.get_chunk(id, 3),
        Err(BufferError::ChannelClosed(_))
    ));
}

#[test]
fn out_of_order_read_rejected() {
    let lobs = LobManager::new(new_manager(1 << 20));
    let id = lobs.create_channel("q1");

    lobs.add_chunk(id, Bytes::from_static(b"a"), false).unwrap();
    lobs.add_chunk(id, Bytes::from_static(b"b"), false).unwrap();

    assert!(matches!(
        lobs.get_chunk(id, 2),
        Err(BufferError::OutOfOrderRead {
            requested: 2,
            expected: 1,
            ..
        })
    ));

    // The failed read did not consume anything.
    let (chunk, _) = lobs.get_chunk(id, 1).unwrap().unwrap();
    assert_eq!(&chunk[..], b"a");
}

#[test]
fn write_after_last_rejected() {
    let lobs = LobManager::new(new_manager(1 << 20));
    let id = lobs.create_channel("q1");

    lobs.add_chunk(id, Bytes::from_static(b"only"), true).unwrap();

    assert!(matches!(
        lobs.add_chunk(id, Bytes::from_static(b"more"), false),
        Err(BufferError::ChannelClosed(_))
    ));
}

#[test]
fn chunk_not_yet_produced() {
    let lobs = LobManager::new(new_manager(1 << 20));
    let id = lobs.create_channel("q1");

    assert!(lobs.get_chunk(id, 1).unwrap().is_none());

    lobs.add_chunk(id, Bytes::from_static(b"x"), false).unwrap();
    assert!(lobs.get_chunk(id, 1).unwrap().is_some());
    assert!(lobs.get_chunk(id, 2).unwrap().is_none());
}

#[test]
fn large_lob_spills_and_streams_back() {
    // Budget far below the LOB size: most chunks must ride the disk
    // tier and stream back in order.
    let manager = new_manager(8_000);
    let lobs = LobManager::new(manager.clone());
    let id = lobs.create_channel("q1");

    let chunks = 64;
    let chunk_len = 512;
    for i in 0..chunks {
        let payload = vec![(i % 251) as u8; chunk_len];
        lobs.add_chunk(id, Bytes::from(payload), i == chunks - 1)
            .unwrap();
    }

    for i in 0..chunks {
        let (chunk, is_last) = lobs.get_chunk(id, i as u64 + 1).unwrap().unwrap();
        assert_eq!(chunk.len(), chunk_len);
        assert!(chunk.iter().all(|b| *b == (i % 251) as u8));
        assert_eq!(is_last, i == chunks - 1);
    }

    manager.shutdown();
}

#[test]
fn remove_channel_is_terminal() {
    let lobs = LobManager::new(new_manager(1 << 20));
    let id = lobs.create_channel("q1");
    lobs.add_chunk(id, Bytes::from_static(b"x"), false).unwrap();

    lobs.remove_channel(id).unwrap();

    assert!(matches!(
        lobs.get_chunk(id, 1),
        Err(BufferError::StreamNotFound(_))
    ));
    assert!(matches!(
        lobs.add_chunk(id, Bytes::from_static(b"y"), false),
        Err(BufferError::StreamNotFound(_))
    ));
}
