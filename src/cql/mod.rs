pub mod filter;
pub mod parser;

pub use filter::Filter;

/// Compile filter text, logging the normalised form.
pub fn compile(text: &str) -> anyhow::Result<Filter> {
    let filter = parser::parse_filter(text)?;
    log::debug!("Compiled filter {:?} as {}", text, filter);
    Ok(filter)
}
