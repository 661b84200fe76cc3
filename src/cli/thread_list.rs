use crate::core::config::path_display;
use crate::core::store::ThreadStore;
use chrono::Local;
use std::error::Error;
use std::path::PathBuf;

pub fn list_threads(database_path: PathBuf) -> Result<(), Box<dyn Error>> {
    let store = ThreadStore::open(database_path)?;
    let threads = store.load_all_threads();
    for notice in store.drain_repairs() {
        eprintln!("⚠️  Thread database was rebuilt: {}", notice.reason);
    }

    println!("💬 Threads in {}", path_display(store.path()));
    println!();
    if threads.is_empty() {
        println!("No threads yet. Run 'threadline chat' to start one.");
        return Ok(());
    }

    for (index, thread) in threads.iter().enumerate() {
        println!(
            "  {:>2}. {}  ({} messages, updated {})",
            index + 1,
            thread.title,
            thread.messages.len(),
            thread
                .updated_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
