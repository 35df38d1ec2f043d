use super::Position;

/// Node of the lazily expanded constraint tree attached to every high-level
/// node. A node at depth `d` fixes the next cell of the first `d` agents in
/// priority order; the resolver plans everyone else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LowLevelNode {
    pub(crate) who: Vec<usize>,
    pub(crate) cells: Vec<Position>,
    pub(crate) depth: usize,
}

impl LowLevelNode {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    pub(crate) fn child(&self, agent: usize, cell: Position) -> Self {
        let mut who = Vec::with_capacity(self.who.len() + 1);
        who.extend_from_slice(&self.who);
        who.push(agent);

        let mut cells = Vec::with_capacity(self.cells.len() + 1);
        cells.extend_from_slice(&self.cells);
        cells.push(cell);

        LowLevelNode {
            who,
            cells,
            depth: self.depth + 1,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, Position)> + '_ {
        self.who.iter().copied().zip(self.cells.iter().copied())
    }
}
