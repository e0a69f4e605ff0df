// 🎨 Rendering boundary - FlowGraph → Plotly Sankey figure
//
// Colors and coordinates are presentation choices. They are passed in as
// a Palette and a Layout so the aggregation core never sees them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::category::{Category, CategorySet};
use crate::flow::FlowGraph;
use crate::period::{Period, PeriodSequence};

// ============================================================================
// PALETTE
// ============================================================================

/// Display color per category label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub colors: BTreeMap<String, String>,

    /// Used for labels with no entry
    pub fallback: String,
}

impl Palette {
    /// Quartile colors: green, yellow, orange, red, and blue for the sentinel
    pub fn quartiles(sentinel: &str) -> Self {
        let mut colors = BTreeMap::new();
        colors.insert("Q1".to_string(), "rgba(100, 180, 80, 0.8)".to_string());
        colors.insert("Q2".to_string(), "rgba(230, 200, 0, 0.8)".to_string());
        colors.insert("Q3".to_string(), "rgba(250, 140, 0, 0.8)".to_string());
        colors.insert("Q4".to_string(), "rgba(220, 60, 50, 0.8)".to_string());
        colors.insert(sentinel.to_string(), "rgba(80, 130, 200, 0.8)".to_string());

        Palette {
            colors,
            fallback: "rgba(150, 150, 150, 0.6)".to_string(),
        }
    }

    pub fn color(&self, label: &str) -> &str {
        self.colors
            .get(label)
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }
}

// ============================================================================
// LAYOUT
// ============================================================================

/// Fixed node coordinates: period → x, category label → y
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub period_x: BTreeMap<Period, f64>,

    #[serde(default)]
    pub category_y: BTreeMap<String, f64>,
}

impl Layout {
    /// Coordinates of the original three-year quartile chart
    pub fn quartiles(sentinel: &str) -> Self {
        let period_x = [(2022, 0.15), (2023, 0.5), (2024, 0.85)]
            .into_iter()
            .map(|(y, x)| (Period(y), x))
            .collect();

        let mut category_y: BTreeMap<String, f64> = [("Q1", 0.15), ("Q2", 0.3), ("Q3", 0.5), ("Q4", 0.83)]
            .into_iter()
            .map(|(q, y)| (q.to_string(), y))
            .collect();
        category_y.insert(sentinel.to_string(), 1.08);

        Layout {
            period_x,
            category_y,
        }
    }

    /// Configured x, or an even spread across the sequence
    pub fn x(&self, periods: &PeriodSequence, period: Period) -> f64 {
        if let Some(x) = self.period_x.get(&period) {
            return *x;
        }
        let position = periods.position(period).unwrap_or(0);
        spread(position, periods.len())
    }

    /// Configured y, or an even spread down the category slots
    pub fn y(&self, categories: &CategorySet, category: Category) -> f64 {
        if let Some(y) = self.category_y.get(categories.label(category)) {
            return *y;
        }
        spread(categories.slot(category), categories.len())
    }
}

fn spread(position: usize, count: usize) -> f64 {
    if count <= 1 {
        return 0.5;
    }
    0.1 + 0.8 * position as f64 / (count - 1) as f64
}

// ============================================================================
// FIGURE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SankeyFigure {
    pub data: Vec<SankeyTrace>,
    pub layout: FigureLayout,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SankeyTrace {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub arrangement: &'static str,
    pub node: SankeyNodes,
    pub link: SankeyLinks,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SankeyNodes {
    pub pad: u32,
    pub thickness: u32,
    pub line: NodeLine,
    pub label: Vec<String>,
    pub color: Vec<String>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeLine {
    pub color: String,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SankeyLinks {
    pub source: Vec<usize>,
    pub target: Vec<usize>,
    pub value: Vec<u64>,

    /// Each link takes the color of its source category
    pub color: Vec<String>,
    pub hovertemplate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FigureLayout {
    pub height: u32,
    pub width: u32,
    pub plot_bgcolor: String,
    pub margin: Margin,
    pub autosize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Margin {
    pub l: u32,
    pub r: u32,
    pub t: u32,
    pub b: u32,
}

impl Default for FigureLayout {
    fn default() -> Self {
        FigureLayout {
            height: 900,
            width: 1800,
            plot_bgcolor: "rgba(250, 250, 250, 0.9)".to_string(),
            margin: Margin {
                l: 20,
                r: 20,
                t: 10,
                b: 180,
            },
            autosize: true,
        }
    }
}

impl SankeyFigure {
    pub fn from_flow(graph: &FlowGraph, palette: &Palette, layout: &Layout) -> Self {
        let categories = graph.categories();
        let periods = graph.periods();
        let nodes = graph.nodes();

        let node_color = |category: Category| palette.color(categories.label(category)).to_string();

        let node = SankeyNodes {
            pad: 25,
            thickness: 20,
            line: NodeLine {
                color: "black".to_string(),
                width: 0.5,
            },
            label: nodes.iter().map(|n| n.label.clone()).collect(),
            color: nodes.iter().map(|n| node_color(n.category)).collect(),
            x: nodes.iter().map(|n| layout.x(periods, n.period)).collect(),
            y: nodes.iter().map(|n| layout.y(categories, n.category)).collect(),
        };

        let edges = graph.edges();
        let link = SankeyLinks {
            source: edges.iter().map(|e| e.source).collect(),
            target: edges.iter().map(|e| e.target).collect(),
            value: edges.iter().map(|e| e.weight).collect(),
            color: edges
                .iter()
                .map(|e| node_color(nodes[e.source].category))
                .collect(),
            hovertemplate: "%{source.label} → %{target.label}<br>Journals: %{value:.0f}<extra></extra>"
                .to_string(),
        };

        SankeyFigure {
            data: vec![SankeyTrace {
                kind: "sankey",
                arrangement: "fixed",
                node,
                link,
            }],
            layout: FigureLayout::default(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
