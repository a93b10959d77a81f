//! Programmer table
//!
//! Kept free of back-end dependencies so the man page generator can share
//! it with the main binary.

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
    /// Accepted parameters
    pub params: &'static str,
}

/// All programmers known to this build
pub fn available_programmers() -> &'static [ProgrammerInfo] {
    &[
        ProgrammerInfo {
            name: "sim",
            aliases: &["dummy"],
            description: "Simulated Intel or AMD part in memory",
            params: "family=intel|amd, layout=x16x16x1, size=<bytes>, block=<bytes>, \
                     buffer=<bytes>, config=<file.ron>, image=<file>, base=<addr>",
        },
        ProgrammerInfo {
            name: "physmap",
            aliases: &["mmio"],
            description: "Memory mapped flash through /dev/mem - requires root",
            params: "base=<addr>, size=<bytes>, width=1|2|4|8",
        },
    ]
}

/// Generate a short list of programmer names for CLI help
pub fn programmer_names_short() -> String {
    let names: Vec<&str> = available_programmers().iter().map(|p| p.name).collect();
    names.join(", ")
}
