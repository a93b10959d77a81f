//! List commands implementation

use crate::registry::available_programmers;

/// List all supported programmers
pub fn list_programmers() {
    println!("Supported programmers:");
    println!();
    for p in available_programmers() {
        let aliases = if p.aliases.is_empty() {
            String::new()
        } else {
            format!(" (alias: {})", p.aliases.join(", "))
        };
        println!("  {:10} - {}{}", p.name, p.description, aliases);
        println!("  {:10}   {}", "", p.params);
    }
}
