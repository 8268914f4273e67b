#[cfg(not(debug_assertions))]
use std::hint::unreachable_unchecked;

/// Panics with an unreachable error in debug builds and compiles down to
/// [`unreachable_unchecked`] in release builds. Only call this on a branch the
/// surrounding code already rules out (for example, looking up a storage slot
/// immediately after registering it); reaching it in release mode is undefined
/// behavior.
#[cfg(debug_assertions)]
pub unsafe fn debug_unreachable(msg: &'static str) -> ! {
    if msg.trim().is_empty() {
        unreachable!();
    } else {
        unreachable!("{}", msg)
    }
}

/// Panics with an unreachable error in debug builds and compiles down to
/// [`unreachable_unchecked`] in release builds. Only call this on a branch the
/// surrounding code already rules out (for example, looking up a storage slot
/// immediately after registering it); reaching it in release mode is undefined
/// behavior.
#[cfg(not(debug_assertions))]
pub unsafe fn debug_unreachable(_: &'static str) -> ! {
    unreachable_unchecked();
}

/// Strips the module path from a type name, leaving generic arguments
/// untouched: `my_game::physics::Position` becomes `Position`.
pub fn short_type_name(full: &str) -> &str {
    let end = full.find('<').unwrap_or(full.len());
    match full[..end].rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names() {
        assert_eq!(short_type_name("a::b::Position"), "Position");
        assert_eq!(short_type_name("Position"), "Position");
        assert_eq!(
            short_type_name("a::Wrapper<b::Inner>"),
            "Wrapper<b::Inner>"
        );
    }
}
