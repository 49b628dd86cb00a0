use core::fmt::Write;

use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    prelude::*,
    primitives::{Line, PrimitiveStyle, Triangle},
    text::Text,
};
use heapless::String;
#[allow(unused_imports)]
use micromath::F32Ext;

const DEG_TO_RAD: f32 = 0.017_453_292_5;

/// Distance from the pivot to where the needle lines start.
const NEEDLE_INSET: i32 = 10;

/// Dial scale description, in the value units of the displayed quantity.
///
/// The scale is split into a green band up to `green_end`, a yellow band
/// up to `yellow_end` and a red band up to `max`. A band collapses to
/// nothing when its bounds fall outside `[min, max]` or cross each other.
pub struct GaugeScale {
    /// Degrees between ticks, greater than zero.
    pub step: i32,
    /// Length of a major tick in pixels; minor ticks use half of it.
    pub tick_len: i32,
    pub min: f32,
    pub max: f32,
    /// Decimal places of the five scale labels.
    pub decimals: usize,
    /// Upper bound of the green band.
    pub green_end: f32,
    /// Upper bound of the yellow band.
    pub yellow_end: f32,
}

/// Analog dial widget: a static scale drawn once plus a needle redrawn in
/// place as the value moves.
///
/// The drawing surface is borrowed per call; the widget keeps only its
/// geometry and enough needle state to erase the previous position.
pub struct Gauge {
    cx: i32,
    cy: i32,
    /// Total angular span of the scale in degrees.
    arc: i32,
    radius: i32,
    last_value: f32,
    needle_slope: f32,
    tip_x: i32,
    tip_y: i32,
    drawn: bool,
}

impl Gauge {
    /// Dial centered on `(cx, cy)` spanning `arc` degrees. `arc` should
    /// be a multiple of four times the tick step so the five major ticks
    /// land on tick positions.
    pub fn new(cx: i32, cy: i32, arc: i32, radius: i32) -> Self {
        Self {
            cx,
            cy,
            arc,
            radius,
            last_value: -999.0,
            needle_slope: 0.0,
            tip_x: 0,
            tip_y: 0,
            drawn: false,
        }
    }

    /// Draws ticks, colored bands, the five quartile labels and the arc
    /// outline. Static content, drawn once before needle updates start.
    pub fn draw_scale<D>(&self, display: &mut D, scale: &GaugeScale) -> Result<(), D::Error>
    where
        D: DrawTarget,
        D::Color: RgbColor,
    {
        let white = <D::Color as RgbColor>::WHITE;
        let amin = -(self.arc / 2);
        let amax = self.arc / 2 + 1;
        let major = self.arc / 4;
        let cent = (scale.max + scale.min) / 2.0;

        // Band thresholds mapped onto tick angles.
        let green_angle = if scale.green_end > scale.min {
            lmap(scale.green_end, scale.min, scale.max, amin as f32, amax as f32) as i32
        } else {
            0
        };
        let yellow_angle = if scale.yellow_end > scale.min {
            lmap(scale.yellow_end, scale.min, scale.max, amin as f32, amax as f32) as i32
        } else {
            0
        };

        let label_style = MonoTextStyle::new(&FONT_6X10, white);

        let mut angle = amin;
        while angle < amax {
            let sx = (((angle - 90) as f32) * DEG_TO_RAD).cos();
            let sy = (((angle - 90) as f32) * DEG_TO_RAD).sin();
            let sx2 = (((angle + scale.step - 90) as f32) * DEG_TO_RAD).cos();
            let sy2 = (((angle + scale.step - 90) as f32) * DEG_TO_RAD).sin();

            // Corners of the band segment between this tick and the next.
            let outer0 = self.polar(sx, sy, self.radius + scale.tick_len);
            let inner0 = self.polar(sx, sy, self.radius);
            let outer1 = self.polar(sx2, sy2, self.radius + scale.tick_len);
            let inner1 = self.polar(sx2, sy2, self.radius);

            if scale.green_end >= scale.min
                && scale.green_end < scale.yellow_end
                && angle >= amin
                && angle < green_angle
            {
                fill_band(
                    display,
                    <D::Color as RgbColor>::GREEN,
                    outer0,
                    inner0,
                    outer1,
                    inner1,
                )?;
            }
            if scale.yellow_end > scale.green_end
                && scale.yellow_end <= scale.max
                && angle >= green_angle
                && angle < yellow_angle
            {
                fill_band(
                    display,
                    <D::Color as RgbColor>::YELLOW,
                    outer0,
                    inner0,
                    outer1,
                    inner1,
                )?;
            }
            if scale.yellow_end > scale.min
                && scale.yellow_end >= scale.green_end
                && scale.yellow_end <= scale.max
                && angle >= yellow_angle
                && angle < amax - 1
            {
                fill_band(
                    display,
                    <D::Color as RgbColor>::RED,
                    outer0,
                    inner0,
                    outer1,
                    inner1,
                )?;
            }

            // Ticks go on top of the bands, minor ones at half length.
            let tick_len = if angle % major != 0 {
                scale.tick_len / 2 + 1
            } else {
                scale.tick_len
            };
            let tick_outer = self.polar(sx, sy, self.radius + tick_len);
            Line::new(tick_outer, inner0)
                .into_styled(PrimitiveStyle::with_stroke(white, 1))
                .draw(display)?;

            if angle % major == 0 {
                // Label position, nudged to center the 6x10 font on the
                // tick it belongs to.
                let anchor = self.polar(sx, sy, self.radius + tick_len + 10);
                let anchor = Point::new(anchor.x - 5, anchor.y + 5);
                let label_value = match angle / major {
                    -2 => Some(scale.min),
                    -1 => Some((cent + scale.min) / 2.0),
                    0 => Some(cent),
                    1 => Some((cent + scale.max) / 2.0),
                    2 => Some(scale.max),
                    _ => None,
                };
                if let Some(value) = label_value {
                    let mut label: String<16> = String::new();
                    let _ = write!(label, "{:.*}", scale.decimals, value);
                    Text::new(&label, anchor, label_style).draw(display)?;
                }
            }

            // Arc outline towards the next tick; the last segment would
            // overshoot the end of the scale.
            if angle < self.arc / 2 {
                Line::new(inner1, inner0)
                    .into_styled(PrimitiveStyle::with_stroke(white, 1))
                    .draw(display)?;
            }

            angle += scale.step;
        }
        Ok(())
    }

    /// Moves the needle to `value`. Values within ±0.05 of the last drawn
    /// value are skipped so ADC noise does not make the needle flicker.
    pub fn draw_needle<D>(
        &mut self,
        display: &mut D,
        value: f32,
        min: f32,
        max: f32,
    ) -> Result<(), D::Error>
    where
        D: DrawTarget,
        D::Color: RgbColor,
    {
        if value <= self.last_value + 0.05 && value >= self.last_value - 0.05 {
            return Ok(());
        }
        self.last_value = value;

        let value = value.max(min).min(max);
        let deg = lmap(
            value,
            min,
            max,
            -(self.arc as f32) / 2.0 - 90.0,
            self.arc as f32 / 2.0 - 90.0,
        );
        let sx = (deg * DEG_TO_RAD).cos();
        let sy = (deg * DEG_TO_RAD).sin();
        // The needle base rides on the tangent through the inset point
        // rather than the pivot itself.
        let slope = ((deg + 90.0) * DEG_TO_RAD).tan();

        if self.drawn {
            self.stroke_needle(display, <D::Color as RgbColor>::BLACK)?;
        }
        self.drawn = true;

        self.needle_slope = slope;
        self.tip_x = (sx * (self.radius - 2) as f32 + self.cx as f32) as i32;
        self.tip_y = (sy * (self.radius - 2) as f32 + self.cy as f32) as i32;
        self.stroke_needle(display, <D::Color as RgbColor>::WHITE)
    }

    /// Three parallel lines from the base to the stored tip; called with
    /// the background color to erase the previous needle.
    fn stroke_needle<D>(&self, display: &mut D, color: D::Color) -> Result<(), D::Error>
    where
        D: DrawTarget,
    {
        let style = PrimitiveStyle::with_stroke(color, 1);
        let base_x = (self.cx as f32 + NEEDLE_INSET as f32 * self.needle_slope) as i32;
        let base_y = self.cy - NEEDLE_INSET;
        for dx in -1..=1 {
            Line::new(
                Point::new(base_x + dx, base_y),
                Point::new(self.tip_x + dx, self.tip_y),
            )
            .into_styled(style)
            .draw(display)?;
        }
        Ok(())
    }

    fn polar(&self, sx: f32, sy: f32, r: i32) -> Point {
        Point::new(
            (sx * r as f32 + self.cx as f32) as i32,
            (sy * r as f32 + self.cy as f32) as i32,
        )
    }
}

/// A band segment is a quad, drawn as two filled triangles.
fn fill_band<D>(
    display: &mut D,
    color: D::Color,
    outer0: Point,
    inner0: Point,
    outer1: Point,
    inner1: Point,
) -> Result<(), D::Error>
where
    D: DrawTarget,
{
    let style = PrimitiveStyle::with_fill(color);
    Triangle::new(outer0, inner0, outer1)
        .into_styled(style)
        .draw(display)?;
    Triangle::new(inner0, outer1, inner1)
        .into_styled(style)
        .draw(display)
}

/// Linear map of `x` from one range onto another.
fn lmap(x: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}
