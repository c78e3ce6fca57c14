//! File transfer tests
//!
//! Round trips through write and read handles, and the failure modes of
//! opening, writing and closing.

mod common;

use std::io::SeekFrom;
use std::time::Duration;

use bucket_ftp::stream::OpenMode;
use bucket_ftp::{DriverError, Result};
use common::*;

async fn write_file(session: &bucket_ftp::driver::Session, path: &str, data: &[u8]) -> Result<()> {
    let mut handle = session.open_file(path, OpenMode::Write).await?;
    handle.write(data).await?;
    handle.close().await
}

async fn read_file(session: &bucket_ftp::driver::Session, path: &str) -> Result<Vec<u8>> {
    let mut handle = session.open_file(path, OpenMode::Read).await?;
    let mut out = Vec::new();
    let mut buf = [0u8; 333];
    loop {
        let n = handle.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    handle.close().await?;
    Ok(out)
}

/// Round trip sizes around the pipe capacity
#[tokio::test]
async fn test_round_trip_sizes() -> Result<()> {
    let (store, session) = session();

    for len in [0, 1, PIPE_CAPACITY - 1, PIPE_CAPACITY, PIPE_CAPACITY * 10 + 7] {
        let path = format!("/file-{}", len);
        let data = payload(len);

        write_file(&session, &path, &data).await?;
        assert_eq!(read_file(&session, &path).await?, data, "size {}", len);
        assert_eq!(store.object(&path[1..]).unwrap().len(), len);
    }

    Ok(())
}

/// Many small writes larger in total than the pipe
#[tokio::test]
async fn test_chunked_writes() -> Result<()> {
    let (_, session) = session();
    let data = payload(PIPE_CAPACITY * 4);

    let mut handle = session.open_file("/chunks.bin", OpenMode::Write).await?;
    for chunk in data.chunks(100) {
        assert_eq!(handle.write(chunk).await?, chunk.len());
    }
    assert_eq!(handle.transferred(), data.len() as u64);
    handle.close().await?;

    assert_eq!(read_file(&session, "/chunks.bin").await?, data);
    Ok(())
}

/// Overwriting replaces the whole object
#[tokio::test]
async fn test_overwrite() -> Result<()> {
    let (_, session) = session();

    write_file(&session, "/f.txt", b"a much longer first version").await?;
    write_file(&session, "/f.txt", b"short").await?;
    assert_eq!(read_file(&session, "/f.txt").await?, b"short");
    Ok(())
}

/// An upload failure is reported by close
#[tokio::test]
async fn test_close_surfaces_upload_failure() -> Result<()> {
    let (store, session) = session();
    store.fail_uploads();

    let mut handle = session.open_file("/doomed", OpenMode::Write).await?;
    handle.write(b"some bytes").await?;

    let err = handle.close().await.unwrap_err();
    assert!(matches!(err, DriverError::Upstream(_)), "got {:?}", err);
    assert!(handle.is_closed());
    Ok(())
}

/// The initial empty PUT fails the open itself
#[tokio::test]
async fn test_open_write_fails_fast() {
    let (store, session) = session();
    store.fail_puts();

    let result = session.open_file("/nope", OpenMode::Write).await;
    assert!(matches!(result, Err(DriverError::Upstream(_))));
    assert!(store.keys().is_empty());
}

/// A missing object fails the open, not the first read
#[tokio::test]
async fn test_open_read_missing() {
    let (_, session) = session();
    let result = session.open_file("/absent", OpenMode::Read).await;
    assert!(result.unwrap_err().is_not_found());
}

/// Seeking is never possible
#[tokio::test]
async fn test_seek_not_supported() -> Result<()> {
    let (store, session) = session();
    store.seed("f", b"0123456789");

    let mut reader = session.open_file("/f", OpenMode::Read).await?;
    assert!(matches!(
        reader.seek(SeekFrom::Start(5)),
        Err(DriverError::NotSupported(_))
    ));

    let mut writer = session.open_file("/g", OpenMode::Write).await?;
    assert!(matches!(
        writer.seek(SeekFrom::End(0)),
        Err(DriverError::NotSupported(_))
    ));
    writer.close().await?;
    Ok(())
}

/// Writes into a missing directory are rejected under the strict policy
#[tokio::test]
async fn test_write_requires_parent() -> Result<()> {
    let (store, session) = session();

    let result = session.open_file("/missing/f.txt", OpenMode::Write).await;
    assert!(result.unwrap_err().is_not_found());
    assert!(store.keys().is_empty());

    session.make_directory("/missing").await?;
    write_file(&session, "/missing/f.txt", b"ok").await?;
    assert_eq!(store.object("missing/f.txt").unwrap(), &b"ok"[..]);
    Ok(())
}

/// Without the strict policy writes create implicit directories
#[tokio::test]
async fn test_write_without_parent_policy() -> Result<()> {
    let store = FaultyStore::new();
    let driver = driver_with(store.clone(), test_config(false, None));
    let session = driver.authenticate(USER, PASSWORD)?;

    write_file(&session, "/a/b/c.txt", b"deep").await?;

    let mut session = session;
    session.change_directory("/a/b").await?;
    assert_eq!(session.current_dir(), "/a/b");
    Ok(())
}

/// Dropping a write handle without close never commits the data
#[tokio::test]
async fn test_abandoned_write_is_not_committed() -> Result<()> {
    let (store, session) = session();

    let mut handle = session.open_file("/partial", OpenMode::Write).await?;
    handle.write(b"half of").await?;
    drop(handle);

    tokio::task::yield_now().await;
    assert_eq!(store.object("partial").unwrap().len(), 0);
    Ok(())
}

/// Directories cannot be opened as files
#[tokio::test]
async fn test_open_directory_path_is_invalid() {
    let (_, session) = session();
    let result = session.open_file("/dir/", OpenMode::Write).await;
    assert!(matches!(result, Err(DriverError::InvalidPath(_))));
}

/// A write waits once the pipe is full and the upload is not reading
#[tokio::test]
async fn test_write_waits_on_full_pipe() -> Result<()> {
    let (store, session) = session();
    store.stall_uploads();

    let mut handle = session.open_file("/slow", OpenMode::Write).await?;
    handle.write(&payload(PIPE_CAPACITY / 2)).await?;

    let blocked = tokio::time::timeout(
        Duration::from_millis(200),
        handle.write(&payload(PIPE_CAPACITY * 4)),
    )
    .await;
    assert!(blocked.is_err(), "write should wait for the upload to drain");
    Ok(())
}
