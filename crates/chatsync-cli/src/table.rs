//! Box-drawing table for `chatsync check`.
//!
//! Column widths are measured on the plain cell text, so cells may carry a
//! colour without breaking alignment.

use colored::{ColoredString, Colorize};

/// How a cell is coloured when rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Good,
    Bad,
}

#[derive(Clone, Debug)]
struct Cell {
    text: String,
    tone: Tone,
}

impl Cell {
    fn width(&self) -> usize {
        self.text.chars().count()
    }

    fn styled(&self) -> ColoredString {
        match self.tone {
            Tone::Plain => self.text.normal(),
            Tone::Good => self.text.bright_green(),
            Tone::Bad => self.text.bright_red(),
        }
    }
}

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row of plain cells. Missing cells are left empty.
    pub fn add_row(&mut self, cells: &[&str]) {
        let cells: Vec<(&str, Tone)> = cells.iter().map(|c| (*c, Tone::Plain)).collect();
        self.add_toned_row(&cells);
    }

    pub fn add_toned_row(&mut self, cells: &[(&str, Tone)]) {
        let row = (0..self.headers.len())
            .map(|i| {
                let (text, tone) = cells.get(i).copied().unwrap_or(("", Tone::Plain));
                Cell {
                    text: text.to_string(),
                    tone,
                }
            })
            .collect();
        self.rows.push(row);
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.width());
            }
        }
        widths
    }

    fn border(widths: &[usize], left: &str, mid: &str, right: &str) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(mid))
    }

    fn line(cells: impl Iterator<Item = String>) -> String {
        let cells: Vec<String> = cells.collect();
        format!("\u{2502}{}\u{2502}", cells.join("\u{2502}"))
    }

    pub fn render(&self) -> String {
        let widths = self.column_widths();
        let mut lines = vec![Self::border(&widths, "\u{250c}", "\u{252c}", "\u{2510}")];

        lines.push(Self::line(self.headers.iter().zip(&widths).map(|(h, w)| {
            let pad = w - h.chars().count();
            format!(" {}{} ", h.bold(), " ".repeat(pad))
        })));
        lines.push(Self::border(&widths, "\u{251c}", "\u{253c}", "\u{2524}"));

        for row in &self.rows {
            lines.push(Self::line(row.iter().zip(&widths).map(|(cell, w)| {
                let pad = w - cell.width();
                format!(" {}{} ", cell.styled(), " ".repeat(pad))
            })));
        }

        lines.push(Self::border(&widths, "\u{2514}", "\u{2534}", "\u{2518}"));
        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}
