//! Human-readable rendering of compiled plans.

use std::fmt::{self, Write};

use super::plan::{AggregateTarget, BaseRelation, BoundOn, ColumnRef, CompiledPlan};

impl CompiledPlan {
    /// Render the plan, nested sub-plans included, as indented text.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_explain(&mut out, 0);
        out
    }

    fn write_explain(&self, out: &mut String, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        writeln!(out, "{pad}plan {}", self.source)?;

        match &self.base {
            BaseRelation::Table(name) => writeln!(out, "{pad}  base: table {name}")?,
            BaseRelation::SubPlan(idx) => writeln!(out, "{pad}  base: sub_plan {idx}")?,
        }

        for join in &self.joins {
            write!(
                out,
                "{pad}  join {}: {}.{} -> {} [{}] on {}",
                join.alias,
                join.owner,
                join.name,
                join.target,
                join.cardinality,
                self.render_on(&join.on)
            )?;
            if let Some(idx) = join.sub_plan {
                write!(out, " via sub_plan {idx}")?;
            }
            writeln!(out)?;
        }

        for key in &self.group_by {
            writeln!(out, "{pad}  group_by {}: {}", key.name, self.render_column(&key.column))?;
        }

        for agg in &self.aggregates {
            let target = match &agg.target {
                AggregateTarget::Rows(relation) => self.relation_name(*relation).to_string(),
                AggregateTarget::Column(column) => self.render_column(column),
            };
            writeln!(out, "{pad}  aggregate {}: {}({})", agg.name, agg.op, target)?;
        }

        for (idx, sub) in self.sub_plans.iter().enumerate() {
            writeln!(out, "{pad}  sub_plan {idx}: {}", sub.source)?;
            sub.plan.write_explain(out, depth + 2)?;
        }

        Ok(())
    }

    fn render_column(&self, column: &ColumnRef) -> String {
        format!("{}.{}", self.relation_name(column.relation), column.field)
    }

    fn render_on(&self, on: &BoundOn) -> String {
        match on {
            BoundOn::Eq { left, right } => {
                format!("{} = {}", self.render_column(left), self.render_column(right))
            }
            BoundOn::And(kids) => kids
                .iter()
                .map(|kid| self.render_on(kid))
                .collect::<Vec<_>>()
                .join(" and "),
        }
    }
}

impl fmt::Display for CompiledPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.explain())
    }
}
