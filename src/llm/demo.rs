use super::GenerationResult;

/// Present in every locally generated answer.
pub const DEMO_MODE_MARKER: &str = "Demo Mode";

pub fn respond(context: &str) -> GenerationResult {
    let notes = if context.is_empty() {
        "no notes available"
    } else {
        "notes detected"
    };

    let text = format!(
        "**Academic Analysis ({DEMO_MODE_MARKER})**

Drawing on your notes ({notes}), here is a general academic perspective.

**Policy Context**
The question intersects with environmental governance, social equity, and institutional frameworks.

**Key Considerations**
- Multi-stakeholder governance
- Evidence-based policy design
- Distributional impacts
- Institutional capacity

**Recommendations**
1. Conduct a stakeholder analysis
2. Review comparative policy cases
3. Assess implementation feasibility
4. Consider justice dimensions

---
*{DEMO_MODE_MARKER} active. Configure an API key in Settings to unlock full analysis.*"
    );

    GenerationResult {
        text,
        grounding: None,
        demo: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_whether_notes_were_found() {
        assert!(respond("").text.contains("no notes available"));
        assert!(respond("【A / b.txt】\nx").text.contains("notes detected"));
    }

    #[test]
    fn test_is_labelled() {
        let result = respond("");
        assert!(result.demo);
        assert!(result.grounding.is_none());
        assert!(result.text.contains(DEMO_MODE_MARKER));
    }
}
