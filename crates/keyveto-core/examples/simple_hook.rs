use keyveto_core::bridge::{engine_config_for, Settings};
use keyveto_core::engine::Engine;
use keyveto_core::native_backend;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("Starting WASD hook test...");

    let (config, warning) = engine_config_for(&Settings::default())?;
    if let Some(warning) = warning {
        println!("{}", warning);
    }

    let engine = Engine::with_config(config, native_backend())?;
    let _sub = engine.on_status_change(|status| {
        println!(
            "active={:?} conflicts={}",
            status.active_keys, status.diagnostics.conflicts_resolved
        );
    });
    engine.start()?;

    println!("Hook active. Try holding A and D together. Press Enter to quit.");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    engine.cleanup();
    println!("{:#?}", engine.get_diagnostics());
    Ok(())
}
