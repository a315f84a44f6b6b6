//! Cross-crate scenario tests for dutkit

#[cfg(test)]
mod config_files;
#[cfg(test)]
mod node_switching;
#[cfg(test)]
mod probe_fixture;
