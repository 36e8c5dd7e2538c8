use std::sync::LazyLock;

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the software, with the git commit appended when it was supplied at build time
/// through `CELLSPLIT_GIT_HASH`.
pub static VERSION: LazyLock<String> = LazyLock::new(|| match option_env!("CELLSPLIT_GIT_HASH") {
    Some(hash) if !hash.is_empty() => format!("{PKG_VERSION}-{hash}"),
    _ => PKG_VERSION.to_string(),
});
