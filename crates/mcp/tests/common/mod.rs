//! Shared helpers: `sh` scripts standing in for a tool worker.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mcp::{Channel, Supervisor};
use tempfile::TempDir;

/// Answers every request with its own method name; `hang` is never answered
/// and `exit` terminates the worker with status 7.
pub const METHOD_ECHO_WORKER: &str = r##"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  method=$(printf '%s\n' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  [ -z "$id" ] && continue
  case "$method" in
    hang) ;;
    exit) exit 7 ;;
    *) printf '{"jsonrpc":"2.0","id":%s,"result":"%s"}\n' "$id" "$method" ;;
  esac
done
"##;

/// Reads two requests, then answers the second before the first.
pub const REVERSING_WORKER: &str = r##"
IFS= read -r first
IFS= read -r second
id1=$(printf '%s\n' "$first" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
id2=$(printf '%s\n' "$second" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
m1=$(printf '%s\n' "$first" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
m2=$(printf '%s\n' "$second" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
printf '{"id":%s,"result":"%s"}\n' "$id2" "$m2"
printf '{"id":%s,"result":"%s"}\n' "$id1" "$m1"
cat > /dev/null
"##;

/// Surrounds every answer with log text, junk, a stray id and a notification,
/// and splits the real answer across two writes.
pub const NOISY_WORKER: &str = r##"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  echo "worker log: handling request $id"
  echo '{"this is": not json}'
  printf '{"jsonrpc":"2.0","id":424242,"result":"stray"}\n'
  printf '{"jsonrpc":"2.0","method":"notifications/progress","params":{}}\n'
  printf '{"jsonrpc":"2.0",'
  sleep 0.1
  printf '"id":%s,"result":"ok"}\n' "$id"
done
"##;

/// Exits with status 5 without reading anything.
pub const EXITING_WORKER: &str = "exit 5";

/// Never answers.
pub const SILENT_WORKER: &str = "cat > /dev/null";

/// A minimal tool worker: `echo` returns its arguments, `fail` returns a
/// protocol error, `flagged` returns an MCP `isError` result.
pub const TOOL_WORKER: &str = r##"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  method=$(printf '%s\n' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  [ -z "$id" ] && continue
  case "$method" in
    initialize)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-worker","version":"0.1.0"}}}\n' "$id" ;;
    tools/list)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo arguments","inputSchema":{"type":"object"}},{"name":"fail","inputSchema":{"type":"object"}},{"name":"flagged","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    tools/call)
      case "$line" in
        *'"name":"echo"'*)
          args=$(printf '%s\n' "$line" | sed -n 's/.*"arguments":\(.*\)}}$/\1/p')
          printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$id" "$args" ;;
        *'"name":"flagged"'*)
          printf '{"jsonrpc":"2.0","id":%s,"result":{"isError":true,"content":[{"type":"text","text":"flagged failure"}]}}\n' "$id" ;;
        *)
          printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"tool exploded"}}\n' "$id" ;;
      esac ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"method not found"}}\n' "$id" ;;
  esac
done
"##;

/// A temporary project whose `.mcp.json` launches `script` under `sh`.
pub fn project_with_worker(script: &str) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = serde_json::json!({
        "mcpServers": { "fake": { "command": "sh", "args": ["-c", script] } }
    });
    std::fs::write(dir.path().join(".mcp.json"), config.to_string()).expect("write config");
    dir
}

pub fn channel(project: &TempDir, timeout: Duration) -> Arc<Channel> {
    Arc::new(Channel::new(Supervisor::new(project.path())).with_timeout(timeout))
}

/// Poll until `predicate` holds or two seconds pass.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}
