use crate::cycle::CycleReport;
use crate::ingest::SkuLine;
use crate::picklist::{FlatEntry, PickListEntry, with_quantity};
use chrono::Local;
use std::fmt::Write;

pub const FLAT_FILE: &str = "TODAYS_ORDERS.txt";
pub const PICK_LIST_FILE: &str = "PICK_LIST.txt";
pub const HTML_FILE: &str = "HTML_ORDERS.html";

const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Every text view of one cycle, ready for the sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedReport {
    pub flat_text: String,
    pub pick_list_text: String,
    pub html: String,
    pub console: String,
}

impl RenderedReport {
    pub fn files(&self) -> [(&'static str, &str); 3] {
        [
            (FLAT_FILE, self.flat_text.as_str()),
            (PICK_LIST_FILE, self.pick_list_text.as_str()),
            (HTML_FILE, self.html.as_str()),
        ]
    }
}

pub fn render(report: &CycleReport) -> RenderedReport {
    RenderedReport {
        flat_text: flat_text(&report.flat),
        pick_list_text: pick_list_text(&report.pick_list),
        html: html(&report.flat),
        console: console_summary(report),
    }
}

/// `SKU` or `SKU ... (N)`, one line per SKU.
pub fn flat_text(flat: &[FlatEntry]) -> String {
    let mut out = String::new();
    for entry in flat {
        if entry.quantity > 1 {
            let _ = writeln!(out, "{} ... ({})", entry.sku, entry.quantity);
        } else {
            let _ = writeln!(out, "{}", entry.sku);
        }
    }
    out
}

pub fn pick_list_text(pick_list: &[PickListEntry]) -> String {
    let mut out = String::new();
    for entry in pick_list {
        let _ = writeln!(out, "{entry}");
    }
    out
}

pub fn html(flat: &[FlatEntry]) -> String {
    let mut out = String::new();
    for entry in flat {
        let label = escape_html(entry.sku.as_str());
        match &entry.image_ref {
            Some(url) => {
                let _ = write!(out, "<a href=\"{}\">{label}</a><br>", escape_html(url));
            }
            None => {
                let _ = write!(out, "{label}<br>");
            }
        }
    }
    out
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn rule(out: &mut String) {
    let _ = writeln!(out, "+{}", "-".repeat(100));
}

fn lines(out: &mut String, lines: &[SkuLine]) {
    for line in lines {
        let _ = writeln!(
            out,
            "| {}",
            with_quantity(line.sku.as_str(), u64::from(line.quantity))
        );
    }
}

struct OrderBlock<'a> {
    position: usize,
    skipped: bool,
    order_id: &'a str,
    customer: &'a str,
    lines: &'a [SkuLine],
}

/// Skipped and accepted orders merged back into batch order.
fn order_blocks(report: &CycleReport) -> Vec<OrderBlock<'_>> {
    let skipped = report.skipped.iter().map(|order| OrderBlock {
        position: order.position,
        skipped: true,
        order_id: &order.order_id,
        customer: &order.customer,
        lines: &order.lines,
    });
    let accepted = report.accepted.iter().map(|order| OrderBlock {
        position: order.position,
        skipped: false,
        order_id: &order.order_id,
        customer: &order.customer,
        lines: &order.lines,
    });
    let mut blocks: Vec<OrderBlock<'_>> = skipped.chain(accepted).collect();
    blocks.sort_by_key(|block| block.position);
    blocks
}

/// Operator-facing summary printed after every cycle.
pub fn console_summary(report: &CycleReport) -> String {
    let mut out = String::new();
    let stamp = report.started_at.with_timezone(&Local).format(TIMESTAMP_FORMAT);
    let _ = writeln!(out, "{stamp}\n");

    for block in order_blocks(report) {
        rule(&mut out);
        if block.skipped {
            let _ = writeln!(out, "| ==== NOT A NEW ORDER ====");
        }
        let _ = writeln!(out, "| {}", block.order_id);
        let _ = writeln!(out, "| {}", block.customer);
        lines(&mut out, block.lines);
    }

    rule(&mut out);
    let _ = writeln!(
        out,
        "| {} ORDERS AWAITING SHIPMENT, {} NEW",
        report.order_count,
        report.accepted.len()
    );
    rule(&mut out);

    if !report.item_errors.is_empty() || !report.size_errors.is_empty() {
        let _ = writeln!(out, "| ITEMS THAT NEED ATTENTION:");
        let _ = writeln!(out, "|");
        for error in &report.item_errors {
            let _ = writeln!(out, "| {error}");
        }
        for error in &report.size_errors {
            let _ = writeln!(out, "| {error}");
        }
        rule(&mut out);
    }

    let _ = writeln!(out, "| ORDERS WITH MORE THAN ONE ITEM QUANTITY:");
    let _ = writeln!(out, "|");
    for (order_id, record) in &report.multi_quantity {
        for line in &record.lines {
            let _ = writeln!(
                out,
                "| {order_id} - {} - {} - ({})",
                record.customer, line.sku, line.quantity
            );
        }
    }
    rule(&mut out);

    let _ = writeln!(out, "| CUSTOMERS WITH MORE THAN ONE ORDER:");
    let _ = writeln!(out, "|");
    for repeat in &report.repeat_customers {
        let _ = writeln!(out, "| {} - {}", repeat.customer, repeat.orders);
    }
    rule(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{AcceptedOrder, CustomerOrders, MultiQuantityRecord, SkipReason, SkippedOrder};
    use crate::picklist::SizeEntry;
    use crate::sku::CanonicalSku;

    fn entry(sku: &str, quantity: u64, image_ref: Option<&str>) -> FlatEntry {
        FlatEntry {
            sku: CanonicalSku::from(sku),
            quantity,
            image_ref: image_ref.map(str::to_string),
        }
    }

    #[test]
    fn flat_text_marks_multiples() {
        let text = flat_text(&[entry("A-600-SML", 5, None), entry("BR-600-SML", 1, None)]);
        assert_eq!(text, "A-600-SML ... (5)\nBR-600-SML\n");
    }

    #[test]
    fn pick_list_text_one_entry_per_line() {
        let text = pick_list_text(&[
            PickListEntry::Group {
                style: "A-600".into(),
                sizes: vec![
                    SizeEntry { size: "SML".into(), quantity: 1 },
                    SizeEntry { size: "XL".into(), quantity: 2 },
                ],
            },
            PickListEntry::Single { name: "Custom Mug".into(), quantity: 1 },
        ]);
        assert_eq!(text, "A-600 -> SML, XL (2)\nCustom Mug\n");
    }

    #[test]
    fn html_links_and_escapes() {
        let out = html(&[
            entry("Tom & Jerry <Mug>", 1, Some("https://img/a?x=1&y=\"2\"")),
            entry("Gift Card", 1, None),
        ]);
        assert_eq!(
            out,
            "<a href=\"https://img/a?x=1&amp;y=&quot;2&quot;\">Tom &amp; Jerry &lt;Mug&gt;</a><br>Gift Card<br>"
        );
    }

    #[test]
    fn console_summary_lists_every_block() {
        let mut report = CycleReport::empty();
        report.order_count = 2;
        report.skipped.push(SkippedOrder {
            position: 0,
            order_id: "#1".into(),
            customer: "Sam".into(),
            reason: SkipReason::AlreadyProcessed,
            lines: vec![SkuLine { sku: CanonicalSku::from("X-1"), quantity: 2 }],
        });
        report.multi_quantity.insert(
            "#2".into(),
            MultiQuantityRecord {
                customer: "Sam".into(),
                lines: vec![SkuLine { sku: CanonicalSku::from("X-2"), quantity: 3 }],
            },
        );
        report.repeat_customers.push(CustomerOrders { customer: "Sam".into(), orders: 2 });

        let text = console_summary(&report);
        assert!(text.contains("| ==== NOT A NEW ORDER ====\n| #1\n| Sam\n| X-1 (2)\n"));
        assert!(text.contains("| 2 ORDERS AWAITING SHIPMENT, 0 NEW"));
        assert!(text.contains("| #2 - Sam - X-2 - (3)"));
        assert!(text.contains("| Sam - 2"));
        assert!(!text.contains("NEED ATTENTION"));
    }

    #[test]
    fn console_blocks_follow_batch_order() {
        let mut report = CycleReport::empty();
        report.order_count = 3;
        report.accepted.push(AcceptedOrder {
            position: 0,
            order_id: "#10".into(),
            customer: "Ana".into(),
            lines: vec![SkuLine { sku: CanonicalSku::from("A-1-SML"), quantity: 1 }],
        });
        report.accepted.push(AcceptedOrder {
            position: 2,
            order_id: "#12".into(),
            customer: "Cy".into(),
            lines: vec![SkuLine { sku: CanonicalSku::from("C-3-SML"), quantity: 1 }],
        });
        report.skipped.push(SkippedOrder {
            position: 1,
            order_id: "#11".into(),
            customer: "Bo".into(),
            reason: SkipReason::AlreadyProcessed,
            lines: vec![SkuLine { sku: CanonicalSku::from("B-2-SML"), quantity: 1 }],
        });

        let text = console_summary(&report);
        let first = text.find("| #10\n").expect("#10 block");
        let second = text.find("| ==== NOT A NEW ORDER ====\n| #11\n").expect("#11 block");
        let third = text.find("| #12\n").expect("#12 block");
        assert!(first < second && second < third);
    }
}
