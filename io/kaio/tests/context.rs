//! Integration tests for the context protocol.
//!
//! Every test runs against the emulated engine, and against native AIO when
//! the kernel allows `io_setup`.

use kaio::{CompletionEvent, Context, Engine, Error, Request, RequestId, Status};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn engines() -> Vec<Engine> {
    let mut engines = vec![Engine::Emulated];
    if kaio::native_available() {
        engines.push(Engine::Native);
    }
    engines
}

fn context(engine: Engine, max_events: usize) -> Context {
    Context::builder()
        .engine(engine)
        .max_events(max_events)
        .workers(2)
        .build()
        .unwrap()
}

/// A file holding `len` bytes where byte `i` is `i % 251`.
fn data_file(len: usize) -> Arc<File> {
    let mut file = tempfile::tempfile().unwrap();
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    file.write_all(&data).unwrap();
    Arc::new(file)
}

fn expected(offset: usize, len: usize) -> Vec<u8> {
    (offset..offset + len).map(|i| (i % 251) as u8).collect()
}

/// Poll until `count` events have been collected.
fn collect(ctx: &Context, count: usize) -> Vec<CompletionEvent> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut events = Vec::new();
    while events.len() < count {
        assert!(Instant::now() < deadline, "timed out waiting for events");
        let want = count - events.len();
        events.extend(
            ctx.get_events(1, want, Some(Duration::from_millis(100)))
                .unwrap(),
        );
    }
    events
}

#[test]
fn test_create_destroy() {
    for engine in engines() {
        for max_events in [1, 2, 32, 1024] {
            let ctx = context(engine, max_events);
            assert_eq!(ctx.engine(), engine);
            assert_eq!(ctx.max_events(), max_events);
            assert_eq!(ctx.in_flight(), 0);
            ctx.destroy().unwrap();
        }
    }
}

#[test]
fn test_create_auto() {
    let ctx = Context::create(8).unwrap();
    assert_ne!(ctx.engine(), Engine::Auto);
    ctx.destroy().unwrap();
}

#[test]
fn test_five_reads() {
    for engine in engines() {
        let ctx = context(engine, 32);
        let file = data_file(5 * 512);

        let mut batch: Vec<Request> = (0..5u64)
            .map(|i| Request::read(file.clone(), i * 512, 512).with_tag(100 + i))
            .collect();
        let ids = ctx.submit(&mut batch).unwrap();
        assert_eq!(ids.len(), 5);
        assert!(batch.is_empty());
        assert_eq!(ctx.in_flight(), 5);

        let events = ctx.get_events(5, 5, None).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(ctx.in_flight(), 0);

        let by_id: HashMap<RequestId, CompletionEvent> =
            events.into_iter().map(|e| (e.id(), e)).collect();
        for (i, id) in ids.iter().enumerate() {
            let event = &by_id[id];
            assert_eq!(event.status(), Status::Completed);
            assert_eq!(event.tag(), 100 + i as u64);
            assert_eq!(event.bytes(), Some(512));
            let request = event.request().unwrap();
            assert_eq!(request.buf(), &expected(i * 512, 512)[..]);
        }

        ctx.destroy().unwrap();
    }
}

#[test]
fn test_partial_acceptance() {
    for engine in engines() {
        let ctx = context(engine, 1);
        let file = data_file(1024);

        let mut batch = vec![
            Request::read(file.clone(), 0, 512).with_tag(1),
            Request::read(file.clone(), 512, 512).with_tag(2),
        ];
        let ids = ctx.submit(&mut batch).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].tag(), 2);

        let events = collect(&ctx, 1);
        assert_eq!(events[0].id(), ids[0]);
        assert_eq!(events[0].tag(), 1);

        // The leftover is still the caller's to resubmit.
        let ids = ctx.submit(&mut batch).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(batch.is_empty());
        let events = collect(&ctx, 1);
        assert_eq!(events[0].tag(), 2);
        assert_eq!(
            events[0].request().unwrap().buf(),
            &expected(512, 512)[..]
        );

        ctx.destroy().unwrap();
    }
}

#[test]
fn test_accepted_prefix_is_in_order() {
    for engine in engines() {
        let ctx = context(engine, 3);
        let file = data_file(4096);

        let mut batch: Vec<Request> = (0..7u64)
            .map(|i| Request::read(file.clone(), i * 64, 64).with_tag(i))
            .collect();
        let ids = ctx.submit(&mut batch).unwrap();
        assert_eq!(ids.len(), 3);
        let left: Vec<u64> = batch.iter().map(|r| r.tag()).collect();
        assert_eq!(left, vec![3, 4, 5, 6]);

        let mut tags: Vec<u64> = collect(&ctx, 3).iter().map(|e| e.tag()).collect();
        tags.sort_unstable();
        assert_eq!(tags, vec![0, 1, 2]);

        ctx.destroy().unwrap();
    }
}

#[test]
fn test_nonblocking_poll() {
    for engine in engines() {
        let ctx = context(engine, 8);
        let start = Instant::now();
        let events = ctx.get_events(0, 8, Some(Duration::ZERO)).unwrap();
        assert!(events.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));

        let events = ctx.get_events_millis(0, 8, 0).unwrap();
        assert!(events.is_empty());
    }
}

#[test]
fn test_timeout_with_nothing_submitted() {
    for engine in engines() {
        let ctx = context(engine, 8);
        let start = Instant::now();
        let events = ctx.get_events_millis(1, 8, 50).unwrap();
        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}

#[test]
fn test_write_then_read() {
    for engine in engines() {
        let ctx = context(engine, 4);
        let file = Arc::new(tempfile::tempfile().unwrap());

        let mut batch = vec![Request::write(file.clone(), 4096, b"hello kaio".to_vec())];
        ctx.submit(&mut batch).unwrap();
        let events = collect(&ctx, 1);
        assert_eq!(events[0].bytes(), Some(10));

        let mut batch = vec![Request::fsync(file.clone())];
        ctx.submit(&mut batch).unwrap();
        let events = collect(&ctx, 1);
        assert_eq!(events[0].status(), Status::Completed);
        assert!(events[0].error().is_none());

        let mut batch = vec![Request::read(file.clone(), 4096, 10)];
        ctx.submit(&mut batch).unwrap();
        let events = collect(&ctx, 1);
        let buf = events.into_iter().next().unwrap().into_request().unwrap().into_buf();
        assert_eq!(&buf, b"hello kaio");

        let mut check = &*file;
        check.seek(SeekFrom::Start(4096)).unwrap();
        let mut contents = String::new();
        check.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello kaio");
    }
}

#[test]
fn test_short_read_at_eof() {
    for engine in engines() {
        let ctx = context(engine, 2);
        let file = data_file(100);

        let mut batch = vec![Request::read(file, 60, 100)];
        ctx.submit(&mut batch).unwrap();
        let events = collect(&ctx, 1);
        assert_eq!(events[0].bytes(), Some(40));
    }
}

#[test]
fn test_failed_request_reports_errno() {
    let ctx = context(Engine::Emulated, 2);
    let file = Arc::new(File::open("/dev/null").unwrap());

    // Opened read-only, so the write fails at execution time.
    let mut batch = vec![Request::write(file, 0, vec![1, 2, 3])];
    ctx.submit(&mut batch).unwrap();
    let events = collect(&ctx, 1);
    assert_eq!(events[0].status(), Status::Completed);
    assert_eq!(events[0].result(), -(libc::EBADF as i64));
    assert_eq!(events[0].bytes(), None);
    assert!(matches!(events[0].error(), Some(Error::InvalidArgument(_))));
}

#[test]
fn test_cancel_after_completion_is_too_late() {
    for engine in engines() {
        let ctx = context(engine, 4);
        let file = data_file(512);

        let mut batch = vec![Request::read(file, 0, 512)];
        let ids = ctx.submit(&mut batch).unwrap();
        collect(&ctx, 1);

        let event = ctx.cancel(ids[0]).unwrap();
        assert_eq!(event.status(), Status::TooLate);
        assert!(event.request().is_none());
        assert!(!event.is_terminal());

        // Still usable afterwards.
        assert_eq!(ctx.in_flight(), 0);
        ctx.destroy().unwrap();
    }
}

#[test]
fn test_cancel_unknown_id() {
    for engine in engines() {
        let a = context(engine, 4);
        let b = context(engine, 4);
        let file = data_file(512);

        let mut batch = vec![Request::read(file, 0, 512)];
        let ids = a.submit(&mut batch).unwrap();
        assert_eq!(ids[0].context(), a.id());
        assert!(matches!(b.cancel(ids[0]), Err(Error::NotFound)));

        collect(&a, 1);
    }
}

#[test]
fn test_every_request_resolves_exactly_once() {
    for engine in engines() {
        let ctx = context(engine, 8);
        let file = data_file(64 * 256);
        let total = 64u64;

        let mut pending: Vec<Request> = (0..total)
            .map(|i| Request::read(file.clone(), i * 256, 256).with_tag(i))
            .collect();
        let mut seen: HashMap<u64, usize> = HashMap::new();
        let deadline = Instant::now() + Duration::from_secs(20);

        while seen.values().sum::<usize>() < total as usize {
            assert!(Instant::now() < deadline, "workload did not finish");

            if !pending.is_empty() && ctx.in_flight() < ctx.max_events() {
                let ids = ctx.submit(&mut pending).unwrap();
                // Try to cancel every other accepted request.
                for id in ids.iter().step_by(2) {
                    let event = ctx.cancel(*id).unwrap();
                    match event.status() {
                        Status::Cancelled => {
                            *seen.entry(event.tag()).or_default() += 1;
                            assert!(event.request().is_some());
                        }
                        Status::CancelPending | Status::TooLate => {}
                        Status::Completed => panic!("cancel never reports Completed"),
                    }
                }
            }

            for event in ctx.get_events(0, 8, Some(Duration::from_millis(10))).unwrap() {
                assert!(event.is_terminal());
                *seen.entry(event.tag()).or_default() += 1;
            }
        }

        assert_eq!(seen.len(), total as usize);
        assert!(seen.values().all(|&n| n == 1));
        assert_eq!(ctx.in_flight(), 0);
        ctx.destroy().unwrap();
    }
}

#[test]
fn test_emulated_cancel_of_queued_request() {
    let ctx = Context::builder()
        .engine(Engine::Emulated)
        .max_events(256)
        .workers(1)
        .build()
        .unwrap();
    let file = data_file(1 << 20);

    let mut batch: Vec<Request> = (0..256u64)
        .map(|i| Request::read(file.clone(), (i % 16) * 65536, 65536).with_tag(i))
        .collect();
    let ids = ctx.submit(&mut batch).unwrap();
    assert_eq!(ids.len(), 256);

    // One worker cannot have started the last request yet in the common case;
    // either way the outcome must be consistent.
    let last = *ids.last().unwrap();
    let event = ctx.cancel(last).unwrap();
    let cancelled = match event.status() {
        Status::Cancelled => {
            assert_eq!(event.result(), -(libc::ECANCELED as i64));
            assert_eq!(event.tag(), 255);
            true
        }
        Status::TooLate => false,
        other => panic!("unexpected status {:?}", other),
    };

    let expect = if cancelled { 255 } else { 256 };
    let events = collect(&ctx, expect);
    assert!(events.iter().all(|e| e.id() != last || !cancelled));
    assert_eq!(ctx.get_events_millis(0, 8, 0).unwrap().len(), 0);
    ctx.destroy().unwrap();
}

#[test]
fn test_destroy_while_busy() {
    for engine in engines() {
        let ctx = context(engine, 4);
        let file = data_file(512);

        let mut batch = vec![Request::read(file, 0, 512)];
        ctx.submit(&mut batch).unwrap();

        let err = ctx.destroy().unwrap_err();
        assert_eq!(err.error(), &Error::StillBusy(1));
        let ctx = err.into_context().unwrap();
        collect(&ctx, 1);
        ctx.destroy().unwrap();
    }
}

#[test]
fn test_drop_with_requests_in_flight() {
    for engine in engines() {
        let ctx = context(engine, 16);
        let file = data_file(16 * 512);
        let mut batch: Vec<Request> = (0..16u64)
            .map(|i| Request::read(file.clone(), i * 512, 512))
            .collect();
        ctx.submit(&mut batch).unwrap();
        drop(ctx);
    }
}

#[test]
fn test_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Context>();

    for engine in engines() {
        let ctx = Arc::new(context(engine, 16));
        let file = data_file(128 * 128);
        let total = 128usize;

        let reaper = {
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(20);
                let mut tags = Vec::new();
                while tags.len() < total && Instant::now() < deadline {
                    for event in ctx.get_events_millis(1, 16, 20).unwrap() {
                        tags.push(event.tag());
                    }
                }
                tags
            })
        };

        let mut pending: Vec<Request> = (0..total as u64)
            .map(|i| Request::read(file.clone(), i * 128, 128).with_tag(i))
            .collect();
        while !pending.is_empty() {
            match ctx.submit(&mut pending) {
                Ok(_) => {}
                Err(Error::ResourceExhausted(_)) => std::thread::yield_now(),
                Err(e) => panic!("submit failed: {}", e),
            }
        }

        let mut tags = reaper.join().unwrap();
        tags.sort_unstable();
        assert_eq!(tags, (0..total as u64).collect::<Vec<_>>());
    }
}

#[test]
fn test_argument_errors() {
    assert!(matches!(
        Context::create(0),
        Err(Error::InvalidArgument(_))
    ));

    let ctx = context(Engine::Emulated, 4);
    assert!(matches!(
        ctx.get_events(0, 0, None),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ctx.get_events(5, 4, None),
        Err(Error::InvalidArgument(_))
    ));
}
