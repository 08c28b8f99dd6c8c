//! Relay Daemon - real-time WebSocket chat relay
//!
//! See `relayd --help` for commands.

fn main() -> anyhow::Result<()> {
    relayd::cli::main()
}
