use super::*;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn text_of(captured: &Captured) -> String {
    captured.to_text_lossy()
}

#[cfg(unix)]
#[test]
fn test_run_captures_stdout() {
    init_tracing();
    let reply = run(["echo", "hello"], RunOptions::default());
    assert_eq!(reply.exit_code, 0);
    assert!(text_of(&reply.stdout).contains("hello"));
    assert!(reply.stderr.is_none());
}

#[cfg(unix)]
#[test]
fn test_timeout_returns_reserved_code_within_bound() {
    let started = Instant::now();
    let reply = run(
        ["sleep", "30"],
        RunOptions {
            timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        },
    );
    let elapsed = started.elapsed();

    assert_eq!(reply.exit_code, EXIT_TIMEOUT);
    assert!(
        elapsed < Duration::from_millis(1500),
        "took {elapsed:?}, expected timeout + a few ticks"
    );
}

#[test]
fn test_spawn_failure_reports_message() {
    let reply = run("this_binary_does_not_exist_xyz", RunOptions::default());
    assert_eq!(reply.exit_code, EXIT_IO_FAILURE);
    assert!(text_of(&reply.stdout).contains("this_binary_does_not_exist_xyz"));
}

#[cfg(unix)]
#[test]
fn test_split_streams_returns_triple() {
    let reply = run(
        ["sh", "-c", "echo A; echo B 1>&2"],
        RunOptions {
            split_streams: true,
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 0);
    assert_eq!(text_of(&reply.stdout), "A\n");
    assert_eq!(text_of(reply.stderr.as_ref().expect("split stderr")), "B\n");
}

#[cfg(unix)]
#[test]
fn test_merged_default_interleaves_both_streams() {
    let reply = run(["sh", "-c", "echo out; echo err 1>&2"], RunOptions::default());
    assert_eq!(reply.exit_code, 0);
    let merged = text_of(&reply.stdout);
    assert!(merged.contains("out"));
    assert!(merged.contains("err"));
    assert!(reply.stderr.is_none());
}

#[cfg(unix)]
#[test]
fn test_queue_sink_receives_chunks_then_sentinel() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let handle = run_threaded(
        ["sh", "-c", "while true; do echo data; done"],
        RunOptions {
            timeout: Some(Duration::from_secs(1)),
            stdout: SinkSpec::Queue(tx),
            ..Default::default()
        },
    );

    let mut chunks = 0usize;
    while let Some(chunk) = rx.blocking_recv() {
        assert!(!chunk.is_empty());
        chunks += 1;
    }
    // recv() returned None: the sentinel, exactly once, after every chunk.
    assert!(chunks >= 1, "expected live chunks before shutdown");

    let reply = handle.join().expect("engine thread");
    assert_eq!(reply.exit_code, EXIT_TIMEOUT);
}

#[cfg(unix)]
#[test]
fn test_timeout_with_unconsumed_queue_still_returns() {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let started = Instant::now();
    let reply = run(
        ["yes"],
        RunOptions {
            timeout: Some(Duration::from_millis(400)),
            stdout: SinkSpec::Queue(tx),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, EXIT_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(3));
    drop(rx);
}

#[cfg(unix)]
#[test]
fn test_subtree_kill_reaches_grandchild() {
    let reply = run(
        CommandSpec::Line("sleep 30 & echo $!; wait".into()),
        RunOptions {
            shell: true,
            timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, EXIT_TIMEOUT);

    let output = text_of(&reply.stdout);
    let grandchild: u32 = output
        .lines()
        .next()
        .expect("shell printed the grandchild PID")
        .trim()
        .parse()
        .expect("PID line");

    // Allow the kill and the reparent-reap to land.
    std::thread::sleep(Duration::from_millis(300));
    assert!(
        !cr_proctree::is_alive(grandchild),
        "grandchild {grandchild} survived the subtree kill"
    );
}

#[cfg(unix)]
#[test]
fn test_valid_exit_code_passes_through() {
    init_tracing();
    let reply = run(
        ["sh", "-c", "exit 7"],
        RunOptions {
            valid_exit_codes: ValidExitCodes::Listed(vec![7]),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 7);
}

#[cfg(unix)]
#[test]
fn test_stop_predicate_aborts() {
    let armed = Instant::now();
    let reply = run(
        ["sleep", "30"],
        RunOptions {
            stop_on: Some(Box::new(move || {
                armed.elapsed() > Duration::from_millis(200)
            })),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, EXIT_STOP_REQUESTED);
    assert!(armed.elapsed() < Duration::from_secs(5));
}

#[cfg(unix)]
#[test]
fn test_callbacks_fire_in_order() {
    let observed_pid = Arc::new(Mutex::new(None::<u32>));
    let observed_exit = Arc::new(Mutex::new(None::<i32>));
    let pid_slot = observed_pid.clone();
    let exit_slot = observed_exit.clone();

    let reply = run(
        ["echo", "cb"],
        RunOptions {
            process_callback: Some(Box::new(move |child| {
                *pid_slot.lock().unwrap() = child.id();
            })),
            on_exit: Some(Box::new(move |reply| {
                *exit_slot.lock().unwrap() = Some(reply.exit_code);
            })),
            ..Default::default()
        },
    );

    assert_eq!(reply.exit_code, 0);
    assert!(observed_pid.lock().unwrap().is_some());
    assert_eq!(*observed_exit.lock().unwrap(), Some(0));
}

#[cfg(unix)]
#[test]
fn test_file_sink_writes_live_and_captures_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmd.log");
    let reply = run(
        ["sh", "-c", "echo filed; echo also-err 1>&2"],
        RunOptions {
            stdout: SinkSpec::File(path.clone()),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 0);
    assert!(reply.stdout.is_empty());

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("filed"));
    // Merged stderr shares the same descriptor.
    assert!(content.contains("also-err"));
}

#[cfg(unix)]
#[test]
fn test_stdin_payload_reaches_child() {
    let reply = run(
        ["cat"],
        RunOptions {
            stdin: StdinSpec::Bytes(b"payload\n".to_vec()),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 0);
    assert_eq!(text_of(&reply.stdout), "payload\n");
}

#[cfg(unix)]
#[test]
fn test_monitor_method_captures_after_exit() {
    let reply = run(
        ["echo", "monitored"],
        RunOptions {
            method: ExecMethod::Monitor,
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 0);
    assert!(text_of(&reply.stdout).contains("monitored"));
}

#[cfg(unix)]
#[test]
fn test_monitor_drain_cut_off_classifies_as_timeout() {
    // The shell exits immediately, but its backgrounded child inherits
    // the stdout pipe and holds it open past the deadline.
    let started = Instant::now();
    let reply = run(
        ["sh", "-c", "sleep 2 & exit 0"],
        RunOptions {
            method: ExecMethod::Monitor,
            timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, EXIT_TIMEOUT);
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[test]
fn test_monitor_with_queue_is_invalid() {
    let (tx, _rx) = tokio::sync::mpsc::channel(8);
    let reply = run(
        ["echo", "x"],
        RunOptions {
            method: ExecMethod::Monitor,
            stdout: SinkSpec::Queue(tx),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, EXIT_INVALID_OPTIONS);
    assert!(text_of(&reply.stdout).contains("poller"));
}

#[cfg(unix)]
#[test]
fn test_raw_decoding_returns_bytes() {
    let reply = run(
        ["sh", "-c", "printf 'a\\xffb'"],
        RunOptions {
            encoding: OutputDecoding::Raw,
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 0);
    assert_eq!(reply.stdout, Captured::Bytes(vec![b'a', 0xFF, b'b']));
}

#[cfg(unix)]
#[test]
fn test_callback_sink_sees_output() {
    let collected = Arc::new(Mutex::new(String::new()));
    let sink = collected.clone();
    let reply = run(
        ["sh", "-c", "echo callback-data"],
        RunOptions {
            stdout: SinkSpec::Callback(Box::new(move |chunk| {
                if let OutputChunk::Text(text) = chunk {
                    sink.lock().unwrap().push_str(text);
                }
            })),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 0);
    assert!(collected.lock().unwrap().contains("callback-data"));
    // The accumulator still captures alongside the callback.
    assert!(text_of(&reply.stdout).contains("callback-data"));
}

#[cfg(unix)]
#[test]
fn test_small_bufsize_preserves_output() {
    let reply = run(
        ["echo", "hello world"],
        RunOptions {
            bufsize: 3,
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 0);
    assert_eq!(text_of(&reply.stdout), "hello world\n");
}

#[cfg(unix)]
#[test]
fn test_heartbeat_does_not_disturb_result() {
    init_tracing();
    let reply = run(
        ["sleep", "0.3"],
        RunOptions {
            heartbeat: Some(Duration::from_millis(100)),
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 0);
}

#[cfg(unix)]
#[test]
fn test_live_output_passthrough_smoke() {
    let reply = run(
        ["echo", "live"],
        RunOptions {
            live_output: true,
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, 0);
    assert!(text_of(&reply.stdout).contains("live"));
}

#[test]
fn test_unbalanced_quotes_are_invalid() {
    let reply = run("echo 'unclosed", RunOptions::default());
    assert_eq!(reply.exit_code, EXIT_INVALID_OPTIONS);
}

#[test]
fn test_spawn_failure_with_split_streams_keeps_triple_shape() {
    let reply = run(
        "this_binary_does_not_exist_xyz",
        RunOptions {
            split_streams: true,
            ..Default::default()
        },
    );
    assert_eq!(reply.exit_code, EXIT_IO_FAILURE);
    let (code, stdout, stderr) = reply.into_triple();
    assert_eq!(code, EXIT_IO_FAILURE);
    assert!(!stdout.is_empty());
    assert!(stderr.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_async_inside_runtime() {
    let reply = run_async(["echo", "async"], RunOptions::default()).await;
    assert_eq!(reply.exit_code, 0);
    assert!(text_of(&reply.stdout).contains("async"));
}

#[cfg(unix)]
#[test]
fn test_reply_tuple_shape() {
    let reply = run(["echo", "pair"], RunOptions::default());
    let (code, output) = reply.into_tuple();
    assert_eq!(code, 0);
    assert!(output.to_text_lossy().contains("pair"));
}
