use std::fs;
use std::str::FromStr;

use crate::common::Position;
use crate::error::MapfError;

#[derive(Debug, Clone)]
pub struct Tile {
    passable: bool,
    pub neighbors: Vec<(usize, usize)>, // Stores coordinates of accessible neighbors
}

impl Tile {
    pub fn is_passable(&self) -> bool {
        self.passable
    }
}

#[derive(Debug, Clone)]
pub struct Map {
    pub height: usize,
    pub width: usize,
    pub grid: Vec<Vec<Tile>>,
}

impl Map {
    pub fn from_file(path: &str) -> Result<Self, MapfError> {
        let content = fs::read_to_string(path).map_err(|source| MapfError::Io {
            path: path.to_string(),
            source,
        })?;
        content.parse()
    }

    fn from_rows(rows: Vec<Vec<bool>>) -> Self {
        let height = rows.len();
        let width = rows.first().map_or(0, |row| row.len());
        let grid = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|passable| Tile {
                        passable,
                        neighbors: Vec::new(),
                    })
                    .collect()
            })
            .collect();

        let mut map = Map {
            height,
            width,
            grid,
        };
        map.initialize_neighbors();
        map
    }

    fn initialize_neighbors(&mut self) {
        for x in 0..self.height {
            for y in 0..self.width {
                if self.grid[x][y].passable {
                    self.grid[x][y].neighbors = self.get_neighbors(x, y);
                }
            }
        }
    }

    /// Orthogonal passable neighbors of `(x, y)`, staying in place excluded.
    pub fn get_neighbors(&self, x: usize, y: usize) -> Vec<(usize, usize)> {
        let directions = [(-1, 0), (1, 0), (0, -1), (0, 1)]; // Up, down, left, right
        let mut neighbors = Vec::new();

        for &(dx, dy) in &directions {
            let new_x = x as i64 + dx;
            let new_y = y as i64 + dy;
            if new_x >= 0
                && new_y >= 0
                && new_x < self.height as i64
                && new_y < self.width as i64
                && self.grid[new_x as usize][new_y as usize].passable
            {
                neighbors.push((new_x as usize, new_y as usize));
            }
        }

        neighbors
    }

    /// Precomputed neighbors of a passable cell.
    pub fn neighbors(&self, position: Position) -> &[Position] {
        &self.grid[position.0][position.1].neighbors
    }

    pub fn in_bounds(&self, x: usize, y: usize) -> bool {
        x < self.height && y < self.width
    }

    pub fn is_passable(&self, x: usize, y: usize) -> bool {
        self.in_bounds(x, y) && self.grid[x][y].is_passable()
    }

    /// Row-major cell index, used by flat per-cell buffers.
    pub fn index(&self, position: Position) -> usize {
        position.0 * self.width + position.1
    }

    pub fn num_cells(&self) -> usize {
        self.height * self.width
    }

    pub fn is_adjacent_or_same(&self, from: Position, to: Position) -> bool {
        from == to || self.neighbors(from).contains(&to)
    }
}

fn parse_cell(ch: char, line: usize) -> Result<bool, MapfError> {
    match ch {
        '.' | 'G' | 'S' => Ok(true),
        '@' | 'O' | 'T' | 'W' => Ok(false),
        _ => Err(MapfError::grid(line, format!("unknown cell symbol {ch:?}"))),
    }
}

fn parse_dimension(line: Option<(usize, &str)>, key: &str) -> Result<usize, MapfError> {
    let (number, text) = line.ok_or_else(|| MapfError::grid(0, format!("missing `{key}` line")))?;
    let mut parts = text.split_whitespace();
    if parts.next() != Some(key) {
        return Err(MapfError::grid(number, format!("expected `{key} <n>`")));
    }
    parts
        .next()
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| MapfError::grid(number, format!("invalid {key} value")))
}

impl FromStr for Map {
    type Err = MapfError;

    /// Accepts the MovingAI layout (`type`, `height`, `width`, `map` header)
    /// or a bare character matrix.
    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim_end()))
            .filter(|(_, line)| !line.is_empty())
            .peekable();

        let expected = match lines.peek() {
            Some((_, first)) if first.starts_with("type") => {
                lines.next();
                let height = parse_dimension(lines.next(), "height")?;
                let width = parse_dimension(lines.next(), "width")?;
                match lines.next() {
                    Some((_, "map")) => {}
                    Some((number, _)) => return Err(MapfError::grid(number, "expected `map`")),
                    None => return Err(MapfError::grid(0, "missing `map` line")),
                }
                Some((height, width))
            }
            _ => None,
        };

        let mut rows = Vec::new();
        for (number, line) in lines {
            let row = line
                .chars()
                .map(|ch| parse_cell(ch, number))
                .collect::<Result<Vec<_>, _>>()?;

            let width = expected.map_or_else(
                || rows.first().map_or(row.len(), |first: &Vec<bool>| first.len()),
                |(_, width)| width,
            );
            if row.len() != width {
                return Err(MapfError::grid(
                    number,
                    format!("row has {} cells, expected {width}", row.len()),
                ));
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(MapfError::grid(0, "grid has no rows"));
        }
        if let Some((height, _)) = expected {
            if rows.len() != height {
                return Err(MapfError::grid(
                    0,
                    format!("grid has {} rows, header says {height}", rows.len()),
                ));
            }
        }

        Ok(Map::from_rows(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_map() {
        let map = Map::from_file("map_file/test/test.map").unwrap();

        assert_eq!(map.height, 3);
        assert_eq!(map.width, 3);

        assert!(map.is_passable(0, 0));
        assert!(!map.is_passable(1, 1));
        assert!(!map.is_passable(3, 0));

        let neighbors = map.get_neighbors(0, 1);
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.contains(&(0, 0)));
        assert!(neighbors.contains(&(0, 2)));
        assert_eq!(map.neighbors((0, 1)), neighbors.as_slice());
    }

    #[test]
    fn test_headerless_map() {
        let map: Map = "..@\n...\n".parse().unwrap();
        assert_eq!((map.height, map.width), (2, 3));
        assert!(!map.is_passable(0, 2));
        assert_eq!(map.index((1, 2)), 5);
        assert!(map.is_adjacent_or_same((1, 1), (1, 2)));
        assert!(!map.is_adjacent_or_same((0, 0), (1, 1)));
    }

    #[test]
    fn test_malformed_map() {
        let ragged = "...\n..\n".parse::<Map>();
        assert!(matches!(ragged, Err(MapfError::MalformedGrid { line: 2, .. })));

        let unknown = "..x\n".parse::<Map>();
        assert!(matches!(unknown, Err(MapfError::MalformedGrid { line: 1, .. })));

        let short = "type octile\nheight 3\nwidth 2\nmap\n..\n..\n".parse::<Map>();
        assert!(matches!(short, Err(MapfError::MalformedGrid { .. })));

        let missing = Map::from_file("map_file/test/does-not-exist.map");
        assert!(matches!(missing, Err(MapfError::Io { .. })));
    }
}
