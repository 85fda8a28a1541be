use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use vantage_base::hashing::HashMap;
use vantage_base::ElementId;

/// One side of a root margin
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum MarginValue {
    Px(f64),
    Percent(f64),
}

impl fmt::Display for MarginValue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            MarginValue::Px(value) => write!(f, "{}px", value),
            MarginValue::Percent(value) => write!(f, "{}%", value),
        }
    }
}

/// Grows (or shrinks, if negative) the viewport used for intersection tests. Parsed from the CSS
/// margin shorthand, for example "200px 0px".
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct RootMargin {
    pub top: MarginValue,
    pub right: MarginValue,
    pub bottom: MarginValue,
    pub left: MarginValue,
}

impl Default for RootMargin {
    fn default() -> Self {
        RootMargin::uniform(MarginValue::Px(0.0))
    }
}

impl RootMargin {
    pub fn uniform(value: MarginValue) -> Self {
        RootMargin {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }
}

impl fmt::Display for RootMargin {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} {} {} {}", self.top, self.right, self.bottom, self.left)
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct RootMarginParseError(pub String);

impl std::error::Error for RootMarginParseError {}

impl fmt::Display for RootMarginParseError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "invalid root margin: {}", self.0)
    }
}

fn parse_margin_value(token: &str) -> Result<MarginValue, RootMarginParseError> {
    let (number, make): (&str, fn(f64) -> MarginValue) = if let Some(number) = token.strip_suffix("px") {
        (number, MarginValue::Px)
    } else if let Some(number) = token.strip_suffix('%') {
        (number, MarginValue::Percent)
    } else if token == "0" {
        (token, MarginValue::Px)
    } else {
        return Err(RootMarginParseError(format!(
            "\"{}\" must be in pixels or a percentage",
            token
        )));
    };

    number
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(make)
        .ok_or_else(|| RootMarginParseError(format!("\"{}\" is not a number", token)))
}

impl FromStr for RootMargin {
    type Err = RootMarginParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split_whitespace()
            .map(parse_margin_value)
            .collect::<Result<Vec<_>, _>>()?;

        // Same expansion rules as the CSS margin shorthand
        let (top, right, bottom, left) = match values.as_slice() {
            [all] => (*all, *all, *all, *all),
            [vertical, horizontal] => (*vertical, *horizontal, *vertical, *horizontal),
            [top, horizontal, bottom] => (*top, *horizontal, *bottom, *horizontal),
            [top, right, bottom, left] => (*top, *right, *bottom, *left),
            _ => {
                return Err(RootMarginParseError(format!(
                    "expected 1 to 4 values, found {}",
                    values.len()
                )))
            }
        };

        Ok(RootMargin {
            top,
            right,
            bottom,
            left,
        })
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct VisibilityConfig {
    // Passed through to the host's intersection primitive
    pub root_margin: RootMargin,
    // Minimum intersection ratio (0..=1) for an element to count as visible. 0 means any overlap.
    pub threshold: f64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        VisibilityConfig {
            root_margin: RootMargin::default(),
            threshold: 0.0,
        }
    }
}

/// The host's viewport-intersection primitive
pub trait IntersectionHost {
    /// Hosts without an intersection primitive return false, and every observed element is
    /// treated as visible.
    fn is_supported(&self) -> bool {
        true
    }

    fn observe(
        &self,
        target: ElementId,
        config: &VisibilityConfig,
    );

    fn unobserve(
        &self,
        target: ElementId,
    );
}

/// An observation delivered by the host
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct IntersectionEntry {
    pub target: ElementId,
    pub intersection_ratio: f64,
    pub is_intersecting: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum VisibilityState {
    Unobserved,
    // Registered with the host but no observation has arrived yet
    Observed,
    Visible,
    Hidden,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum VisibilityEvent {
    Visible { target: ElementId, ratio: f64 },
    Hidden { target: ElementId },
}

impl VisibilityEvent {
    pub fn target(&self) -> ElementId {
        match self {
            VisibilityEvent::Visible { target, .. } => *target,
            VisibilityEvent::Hidden { target } => *target,
        }
    }
}

pub type VisibilityCallback = Box<dyn FnMut(&VisibilityEvent)>;

struct TrackedElement {
    state: VisibilityState,
    callback: Option<VisibilityCallback>,
}

/// Turns raw intersection observations into deduplicated visible/hidden transitions.
///
/// Per element: `Observed -> Visible <-> Hidden`, and back to unobserved on `unobserve`. Repeated
/// observations that don't change the state emit nothing.
pub struct VisibilityTracker {
    config: VisibilityConfig,
    host: Rc<dyn IntersectionHost>,
    supported: bool,
    elements: HashMap<ElementId, TrackedElement>,
    // Emitted since the last take_events()
    events: Vec<VisibilityEvent>,
}

impl VisibilityTracker {
    pub fn new(
        mut config: VisibilityConfig,
        host: Rc<dyn IntersectionHost>,
    ) -> Self {
        if !(0.0..=1.0).contains(&config.threshold) {
            log::warn!(
                "visibility threshold {} is outside 0..=1, clamping",
                config.threshold
            );
            config.threshold = if config.threshold.is_nan() {
                0.0
            } else {
                config.threshold.clamp(0.0, 1.0)
            };
        }

        let supported = host.is_supported();
        if !supported {
            log::warn!("intersection observation is unavailable, all observed elements will be treated as visible");
        }

        VisibilityTracker {
            config,
            host,
            supported,
            elements: Default::default(),
            events: Default::default(),
        }
    }

    pub fn config(&self) -> &VisibilityConfig {
        &self.config
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn is_observed(
        &self,
        target: ElementId,
    ) -> bool {
        self.elements.contains_key(&target)
    }

    pub fn observed_count(&self) -> usize {
        self.elements.len()
    }

    pub fn state(
        &self,
        target: ElementId,
    ) -> VisibilityState {
        self.elements
            .get(&target)
            .map(|element| element.state)
            .unwrap_or(VisibilityState::Unobserved)
    }

    /// Start tracking an element. The optional callback receives every transition for it.
    pub fn observe(
        &mut self,
        target: ElementId,
        callback: Option<VisibilityCallback>,
    ) {
        if self.elements.contains_key(&target) {
            log::warn!("{:?} is already observed, ignoring", target);
            return;
        }

        self.elements.insert(
            target,
            TrackedElement {
                state: VisibilityState::Observed,
                callback,
            },
        );

        if self.supported {
            self.host.observe(target, &self.config);
        } else {
            // Degraded mode, everything is considered on screen
            self.transition(target, true, 1.0);
        }
    }

    /// Stop tracking an element. An element that was visible gets one final hidden event, which is
    /// returned rather than queued for take_events().
    pub fn unobserve(
        &mut self,
        target: ElementId,
    ) -> Option<VisibilityEvent> {
        let mut element = match self.elements.remove(&target) {
            Some(element) => element,
            None => {
                log::debug!("{:?} is not observed, nothing to unobserve", target);
                return None;
            }
        };

        if self.supported {
            self.host.unobserve(target);
        }

        if element.state == VisibilityState::Visible {
            let event = VisibilityEvent::Hidden { target };
            log::debug!("{:?} on unobserve", event);
            if let Some(callback) = &mut element.callback {
                callback(&event);
            }
            Some(event)
        } else {
            None
        }
    }

    fn is_visible(
        &self,
        entry: &IntersectionEntry,
    ) -> bool {
        entry.is_intersecting && entry.intersection_ratio >= self.config.threshold
    }

    /// Feed observations from the host. Returns the transitions they caused, plus any emitted
    /// since the last call.
    #[profiling::function]
    pub fn process_entries(
        &mut self,
        entries: &[IntersectionEntry],
    ) -> Vec<VisibilityEvent> {
        for entry in entries {
            let visible = self.is_visible(entry);
            self.transition(entry.target, visible, entry.intersection_ratio);
        }

        self.take_events()
    }

    pub fn take_events(&mut self) -> Vec<VisibilityEvent> {
        std::mem::take(&mut self.events)
    }

    fn transition(
        &mut self,
        target: ElementId,
        visible: bool,
        ratio: f64,
    ) {
        let element = match self.elements.get_mut(&target) {
            Some(element) => element,
            None => {
                // Observations can still arrive for an element we just unobserved
                log::trace!("ignoring observation for untracked {:?}", target);
                return;
            }
        };

        let event = match (element.state, visible) {
            (VisibilityState::Observed, true) | (VisibilityState::Hidden, true) => {
                element.state = VisibilityState::Visible;
                Some(VisibilityEvent::Visible { target, ratio })
            }
            (VisibilityState::Visible, false) => {
                element.state = VisibilityState::Hidden;
                Some(VisibilityEvent::Hidden { target })
            }
            (VisibilityState::Observed, false) => {
                // Never seen, so there is nothing to hide
                element.state = VisibilityState::Hidden;
                None
            }
            _ => None,
        };

        if let Some(event) = event {
            log::debug!("{:?}", event);
            if let Some(callback) = &mut element.callback {
                callback(&event);
            }
            self.events.push(event);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_root_margin_shorthand() {
        let margin: RootMargin = "200px".parse().unwrap();
        assert_eq!(margin, RootMargin::uniform(MarginValue::Px(200.0)));

        let margin: RootMargin = "10px 5%".parse().unwrap();
        assert_eq!(margin.top, MarginValue::Px(10.0));
        assert_eq!(margin.right, MarginValue::Percent(5.0));
        assert_eq!(margin.bottom, MarginValue::Px(10.0));
        assert_eq!(margin.left, MarginValue::Percent(5.0));

        let margin: RootMargin = "1px 2px 3px".parse().unwrap();
        assert_eq!(margin.left, MarginValue::Px(2.0));

        let margin: RootMargin = "0 -4px 3px 4px".parse().unwrap();
        assert_eq!(margin.top, MarginValue::Px(0.0));
        assert_eq!(margin.right, MarginValue::Px(-4.0));
        assert_eq!(margin.to_string(), "0px -4px 3px 4px");
    }

    #[test]
    fn reject_bad_root_margins() {
        assert!("".parse::<RootMargin>().is_err());
        assert!("10em".parse::<RootMargin>().is_err());
        assert!("1px 2px 3px 4px 5px".parse::<RootMargin>().is_err());
        assert!("abcpx".parse::<RootMargin>().is_err());
    }
}
