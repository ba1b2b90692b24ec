/// The five analytic pages. Pages change only on user input and there is no
/// terminal page; the dashboard always opens on [`Page::Correlation`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Page {
    #[default]
    Correlation,
    Liquidity,
    Predictions,
    Costs,
    Risk,
}

impl Page {
    pub const ALL: [Page; 5] = [
        Page::Correlation,
        Page::Liquidity,
        Page::Predictions,
        Page::Costs,
        Page::Risk,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Page::Correlation => "Correlation",
            Page::Liquidity => "Liquidity",
            Page::Predictions => "AI Predictions",
            Page::Costs => "Cost Analysis",
            Page::Risk => "Risk Metrics",
        }
    }

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|page| page == self).unwrap_or(0)
    }

    pub fn next(&self) -> Page {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn prev(&self) -> Page {
        let len = Self::ALL.len();
        Self::ALL[(self.index() + len - 1) % len]
    }

    /// `'1'` selects the first page, `'5'` the last.
    pub fn from_digit(ch: char) -> Option<Page> {
        let idx = ch.to_digit(10)? as usize;
        idx.checked_sub(1).and_then(|idx| Self::ALL.get(idx).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_on_correlation() {
        assert_eq!(Page::default(), Page::Correlation);
    }

    #[test]
    fn cycling_wraps_both_ways() {
        assert_eq!(Page::Risk.next(), Page::Correlation);
        assert_eq!(Page::Correlation.prev(), Page::Risk);
        let mut page = Page::Correlation;
        for _ in 0..Page::ALL.len() {
            page = page.next();
        }
        assert_eq!(page, Page::Correlation);
    }

    #[test]
    fn digits_select_pages() {
        assert_eq!(Page::from_digit('1'), Some(Page::Correlation));
        assert_eq!(Page::from_digit('4'), Some(Page::Costs));
        assert_eq!(Page::from_digit('5'), Some(Page::Risk));
        assert_eq!(Page::from_digit('0'), None);
        assert_eq!(Page::from_digit('6'), None);
        assert_eq!(Page::from_digit('x'), None);
    }
}
