//! Source locations and the location stack errors accumulate.
//!
//! Every IR node carries its own source location, and every node boundary
//! an error crosses appends that location to the outgoing error, so the
//! finished stack reads from the node that raised the error outward to the
//! top-level call. `LocationStack` is that accumulator.

use std::fmt;
use std::rc::Rc;

/// A single file/line/column source position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: Rc<str>,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<Rc<str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An ordered list of locations, the raising node first and the top-level
/// call last.
///
/// `push_enclosing` appends a location as the interpreter unwinds through an
/// enclosing node, so the finished stack reads the location of the node that
/// raised the error first, then each enclosing call site in the order the
/// error passed through it, ending with the top-level call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationStack(Vec<Location>);

impl LocationStack {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn single(loc: Location) -> Self {
        Self(vec![loc])
    }

    /// Record that this error also crossed a boundary at `loc`, the next
    /// enclosing site outward from everything recorded so far.
    pub fn push_enclosing(&mut self, loc: Location) {
        self.0.push(loc);
    }

    pub fn locations(&self) -> &[Location] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LocationStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|l| l.to_string()).collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_enclosing_appends_outward() {
        let mut stack = LocationStack::single(Location::new("a.vl", 3, 1));
        stack.push_enclosing(Location::new("a.vl", 10, 4));
        stack.push_enclosing(Location::new("a.vl", 20, 1));
        let lines: Vec<u32> = stack.locations().iter().map(|l| l.line).collect();
        assert_eq!(lines, vec![3, 10, 20]);
    }
}
