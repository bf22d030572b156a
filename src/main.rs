fn setup_environment() {
    std::env::remove_var("PYTHONHOME");
    std::env::remove_var("PYTHONPATH");
    std::env::set_var("PYTHONIOENCODING", "utf-8");
    std::env::set_var("PYTHONUTF8", "1");
}

fn main() -> anyhow::Result<()> {
    setup_environment();
    tokio::runtime::Runtime::new()?.block_on(urlrelay_lib::run())
}
