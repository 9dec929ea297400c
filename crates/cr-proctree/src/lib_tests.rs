use super::*;

fn spawn_sleeper(secs: u32) -> std::process::Child {
    std::process::Command::new("sleep")
        .arg(secs.to_string())
        .spawn()
        .expect("spawn sleep")
}

#[test]
fn test_is_alive_for_own_process() {
    assert!(is_alive(std::process::id()));
}

#[test]
fn test_is_alive_for_exited_child() {
    let mut child = spawn_sleeper(0);
    child.wait().expect("wait");
    // The PID is reaped; the probe must not report it live.
    assert!(!is_alive(child.id()));
}

#[test]
fn test_descendants_of_leaf_is_empty() {
    let mut child = spawn_sleeper(5);
    let kids = descendants(child.id());
    assert!(kids.is_empty(), "sleep spawns no children: {kids:?}");
    child.kill().ok();
    child.wait().ok();
}

#[test]
fn test_descendants_sees_grandchild() {
    // sh -c 'sleep 5' runs sleep as a child of the shell.
    let mut child = std::process::Command::new("sh")
        .args(["-c", "sleep 5"])
        .spawn()
        .expect("spawn sh");
    // Give the shell a moment to fork the sleeper.
    std::thread::sleep(std::time::Duration::from_millis(300));

    let kids = descendants(child.id());
    // Some shells exec the single command instead of forking; both shapes
    // are legal, but when there is a child it must be parented to the shell.
    for node in &kids {
        assert_eq!(node.parent, child.id());
    }

    child.kill().ok();
    child.wait().ok();
}

#[tokio::test]
async fn test_terminate_tree_kills_root() {
    let child = spawn_sleeper(30);
    let pid = child.id();

    let report = terminate_tree(pid, Duration::from_millis(100)).await;
    assert!(report.terminated >= 1, "report: {report:?}");

    // Reap so the PID does not linger as a zombie (zombies still probe alive).
    let mut child = child;
    child.wait().expect("wait");
    assert!(!is_alive(pid));
}

#[tokio::test]
async fn test_terminate_tree_on_dead_pid_is_harmless() {
    let mut child = spawn_sleeper(0);
    child.wait().expect("wait");

    let report = terminate_tree(child.id(), Duration::from_millis(10)).await;
    assert_eq!(report.killed, 0);
    assert!(report.survivors.is_empty());
}
