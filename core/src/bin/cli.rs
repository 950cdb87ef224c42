/// CLI for the GoalLeader server
fn main() -> anyhow::Result<()> {
    goalleader_core::cli_app::run(std::env::args().collect())
}
