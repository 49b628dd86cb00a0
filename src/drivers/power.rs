use core::marker::PhantomData;

use embedded_hal::adc::{Channel, OneShot};

/// Midpoint of a 10-bit ADC, which is where an ACS712 output sits at zero
/// current on a healthy 5 V rail. Used as the zero offset until a
/// calibration pass replaces it with the measured standby average.
pub const DEFAULT_ZERO_OFFSET: f32 = 512.0;

/// Per-sample safety predicate. Gets every raw ADC count as it is read;
/// returning `false` aborts the acquisition on the spot.
pub type CheckHook = fn(u16) -> bool;

/// Correction applied to a computed value right before it is stored.
pub type AdjustHook = fn(f32) -> f32;

/// Channel whose check hook rejected a raw sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Abort {
    Current,
    Voltage,
}

/// Combined current/voltage/power monitor for a Hall-effect current
/// sensor plus a resistive voltage divider sharing one ADC.
///
/// `IREADINGS`/`VREADINGS` set how many raw samples are averaged per
/// reading. Current defaults to 200 against sensor noise; its check hook
/// still runs on every single raw sample, so a short is caught long
/// before the average completes. Voltage is quieter and defaults to 20.
pub struct PowerMonitor<ADC, A, VPIN, IPIN, const IREADINGS: usize = 200, const VREADINGS: usize = 20>
{
    adc: A,
    voltage_pin: VPIN,
    current_pin: IPIN,
    adc_to_volts: f32,
    volts_per_ampere: f32,
    zero_offset: f32,
    voltage: f32,
    current: f32,
    power: f32,
    check_current: Option<CheckHook>,
    check_voltage: Option<CheckHook>,
    adjust_current: Option<AdjustHook>,
    adjust_voltage: Option<AdjustHook>,
    _adc: PhantomData<ADC>,
}

impl<ADC, A, VPIN, IPIN, const IREADINGS: usize, const VREADINGS: usize>
    PowerMonitor<ADC, A, VPIN, IPIN, IREADINGS, VREADINGS>
where
    A: OneShot<ADC, u16, VPIN> + OneShot<ADC, u16, IPIN>,
    VPIN: Channel<ADC>,
    IPIN: Channel<ADC>,
{
    /// `adc_to_volts` converts one ADC count to volts, `volts_per_ampere`
    /// is the sensor sensitivity constant and must be non-zero.
    pub fn new(
        adc: A,
        voltage_pin: VPIN,
        current_pin: IPIN,
        adc_to_volts: f32,
        volts_per_ampere: f32,
    ) -> Self {
        Self {
            adc,
            voltage_pin,
            current_pin,
            adc_to_volts,
            volts_per_ampere,
            zero_offset: DEFAULT_ZERO_OFFSET,
            voltage: 0.0,
            current: 0.0,
            power: 0.0,
            check_current: None,
            check_voltage: None,
            adjust_current: None,
            adjust_voltage: None,
            _adc: PhantomData,
        }
    }

    /// Runs a measurement pass and stores voltage, current and power.
    ///
    /// Current is sampled first. A current-check rejection leaves all
    /// readings untouched; a voltage-check rejection happens after the
    /// new current has already been stored, so voltage and power keep
    /// their previous values.
    pub fn measure(&mut self) -> Result<(), Abort> {
        let raw_avg = sample_averaged(
            &mut self.adc,
            &mut self.current_pin,
            IREADINGS,
            self.check_current,
        )
        .ok_or(Abort::Current)?;

        // The standby average stored by `calibrate` is what gets
        // subtracted; with good wiring it sits near mid-scale anyway.
        let mut i_val = raw_avg - self.zero_offset;
        // A sensor wired backwards only flips the sign. Only the DC
        // magnitude is reported.
        if i_val < 0.0 {
            i_val = -i_val;
        }
        i_val *= self.adc_to_volts;
        i_val /= self.volts_per_ampere;
        if let Some(adjust) = self.adjust_current {
            i_val = adjust(i_val);
        }
        // an adjust hook may overshoot below zero
        self.current = i_val.max(0.0);

        let raw_avg = sample_averaged(
            &mut self.adc,
            &mut self.voltage_pin,
            VREADINGS,
            self.check_voltage,
        )
        .ok_or(Abort::Voltage)?;
        let mut v_val = raw_avg * self.adc_to_volts;
        if let Some(adjust) = self.adjust_voltage {
            v_val = adjust(v_val);
        }
        self.voltage = v_val;
        self.power = self.voltage * self.current;
        Ok(())
    }

    /// Samples the unloaded current channel and stores the average as the
    /// new zero-current offset. The voltage channel is not touched and no
    /// reading is updated.
    pub fn calibrate(&mut self) -> Result<(), Abort> {
        let raw_avg = sample_averaged(
            &mut self.adc,
            &mut self.current_pin,
            IREADINGS,
            self.check_current,
        )
        .ok_or(Abort::Current)?;
        self.zero_offset = raw_avg;
        #[cfg(feature = "defmt")]
        defmt::debug!("current zero offset calibrated: {}", self.zero_offset);
        Ok(())
    }

    /// Last measured voltage in volts.
    pub fn get_voltage(&self) -> f32 {
        self.voltage
    }

    /// Last measured current in amperes, never negative.
    pub fn get_current(&self) -> f32 {
        self.current
    }

    /// Active power of the last measurement, in watts.
    pub fn get_power(&self) -> f32 {
        self.power
    }

    /// Raw-count average currently used as the zero-current level.
    pub fn get_zero_offset(&self) -> f32 {
        self.zero_offset
    }

    pub fn set_current_check(&mut self, check: CheckHook) {
        self.check_current = Some(check);
    }

    pub fn set_voltage_check(&mut self, check: CheckHook) {
        self.check_voltage = Some(check);
    }

    pub fn set_current_adjust(&mut self, adjust: AdjustHook) {
        self.adjust_current = Some(adjust);
    }

    pub fn set_voltage_adjust(&mut self, adjust: AdjustHook) {
        self.adjust_voltage = Some(adjust);
    }
}

/// Reads `count` raw samples from one pin and returns their mean, or
/// `None` as soon as the check hook rejects a sample. The partial sum of
/// an aborted run is discarded, it is a safety exit and not a reading.
fn sample_averaged<ADC, A, PIN>(
    adc: &mut A,
    pin: &mut PIN,
    count: usize,
    check: Option<CheckHook>,
) -> Option<f32>
where
    A: OneShot<ADC, u16, PIN>,
    PIN: Channel<ADC>,
{
    let mut sum = 0.0;
    for _ in 0..count {
        let raw = loop {
            match adc.read(pin) {
                Ok(sample) => break sample,
                Err(_) => continue,
            }
        };
        if let Some(check) = check {
            if !check(raw) {
                return None;
            }
        }
        sum += raw as f32;
    }
    Some(sum / count as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::adc::{Mock, MockAdc, MockChan0, MockChan1, Transaction};

    // 5 V reference over a 10-bit ADC, ACS712-30A sensitivity.
    const ADC_CONV: f32 = 0.0048828;
    const VOLTS_PER_AMPERE: f32 = 0.066;

    type Monitor<const I: usize, const V: usize> =
        PowerMonitor<MockAdc, Mock<u16>, MockChan0, MockChan1, I, V>;

    fn monitor<const I: usize, const V: usize>(adc: &Mock<u16>) -> Monitor<I, V> {
        PowerMonitor::new(
            adc.clone(),
            MockChan0 {},
            MockChan1 {},
            ADC_CONV,
            VOLTS_PER_AMPERE,
        )
    }

    fn current_reads(raws: &[u16]) -> Vec<Transaction<u16>> {
        raws.iter().map(|&raw| Transaction::read(1, raw)).collect()
    }

    fn voltage_reads(raws: &[u16]) -> Vec<Transaction<u16>> {
        raws.iter().map(|&raw| Transaction::read(0, raw)).collect()
    }

    fn below_short_threshold(raw: u16) -> bool {
        raw < 1000
    }

    fn force_negative(_: f32) -> f32 {
        -1.0
    }

    fn invert(v: f32) -> f32 {
        -v
    }

    #[test]
    fn default_zero_offset_is_adc_midpoint() {
        let adc: Mock<u16> = Mock::new(&[]);
        let psu: Monitor<3, 2> = monitor(&adc);
        assert_eq!(psu.get_zero_offset(), DEFAULT_ZERO_OFFSET);
        assert_eq!(psu.get_voltage(), 0.0);
        assert_eq!(psu.get_current(), 0.0);
        assert_eq!(psu.get_power(), 0.0);
    }

    #[test]
    fn calibration_stores_the_standby_average() {
        let stream = current_reads(&[500, 512, 524]);
        let mut adc: Mock<u16> = Mock::new(&stream);
        let mut psu: Monitor<3, 2> = monitor(&adc);
        psu.calibrate().unwrap();
        assert_eq!(psu.get_zero_offset(), 512.0);
        adc.done();
    }

    #[test]
    fn calibration_is_idempotent_for_identical_streams() {
        let raws = [500u16, 512, 524];
        let mut offsets = [0.0f32; 2];
        for slot in offsets.iter_mut() {
            let stream = current_reads(&raws);
            let adc: Mock<u16> = Mock::new(&stream);
            let mut psu: Monitor<3, 2> = monitor(&adc);
            psu.calibrate().unwrap();
            *slot = psu.get_zero_offset();
        }
        assert_eq!(offsets[0], offsets[1]);
    }

    #[test]
    fn reading_against_own_calibration_is_zero_current() {
        // Unequal raws with the same mean as the calibration stream.
        let stream = [
            current_reads(&[500, 512, 524]),
            current_reads(&[524, 512, 500]),
            voltage_reads(&[716; 2]),
        ]
        .concat();
        let mut adc: Mock<u16> = Mock::new(&stream);
        let mut psu: Monitor<3, 2> = monitor(&adc);
        psu.calibrate().unwrap();
        psu.measure().unwrap();
        assert_eq!(psu.get_current(), 0.0);
        assert_eq!(psu.get_power(), 0.0);
        adc.done();
    }

    #[test]
    fn current_magnitude_ignores_sensor_polarity() {
        // 100 counts above and below the default offset.
        let forward = [current_reads(&[612; 3]), voltage_reads(&[716; 2])].concat();
        let reversed = [current_reads(&[412; 3]), voltage_reads(&[716; 2])].concat();
        let mut results = [0.0f32; 2];
        for (slot, stream) in results.iter_mut().zip([forward, reversed]) {
            let adc: Mock<u16> = Mock::new(&stream);
            let mut psu: Monitor<3, 2> = monitor(&adc);
            psu.measure().unwrap();
            *slot = psu.get_current();
        }
        assert!(results[0] > 0.0);
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn current_adjust_overshoot_clamps_to_zero() {
        let stream = [current_reads(&[700; 3]), voltage_reads(&[716; 2])].concat();
        let mut adc: Mock<u16> = Mock::new(&stream);
        let mut psu: Monitor<3, 2> = monitor(&adc);
        psu.set_current_adjust(force_negative);
        psu.measure().unwrap();
        assert_eq!(psu.get_current(), 0.0);
        adc.done();
    }

    #[test]
    fn voltage_adjust_result_is_stored_unclamped() {
        let stream = [current_reads(&[512; 3]), voltage_reads(&[716; 2])].concat();
        let mut adc: Mock<u16> = Mock::new(&stream);
        let mut psu: Monitor<3, 2> = monitor(&adc);
        psu.set_voltage_adjust(invert);
        psu.measure().unwrap();
        assert!(psu.get_voltage() < 0.0);
        assert_eq!(psu.get_power(), psu.get_voltage() * psu.get_current());
        adc.done();
    }

    #[test]
    fn current_abort_leaves_readings_untouched() {
        let stream = [
            current_reads(&[612; 3]),
            voltage_reads(&[716; 2]),
            current_reads(&[612, 612, 1023]),
        ]
        .concat();
        let mut adc: Mock<u16> = Mock::new(&stream);
        let mut psu: Monitor<3, 2> = monitor(&adc);
        psu.set_current_check(below_short_threshold);
        psu.measure().unwrap();
        let voltage = psu.get_voltage();
        let current = psu.get_current();
        let power = psu.get_power();

        assert_eq!(psu.measure(), Err(Abort::Current));
        assert_eq!(psu.get_voltage(), voltage);
        assert_eq!(psu.get_current(), current);
        assert_eq!(psu.get_power(), power);
        adc.done();
    }

    #[test]
    fn voltage_abort_keeps_current_from_this_pass() {
        let stream = [
            current_reads(&[612; 3]),
            voltage_reads(&[716; 2]),
            current_reads(&[812; 3]),
            voltage_reads(&[1023]),
        ]
        .concat();
        let mut adc: Mock<u16> = Mock::new(&stream);
        let mut psu: Monitor<3, 2> = monitor(&adc);
        psu.set_voltage_check(below_short_threshold);
        psu.measure().unwrap();
        let first_current = psu.get_current();
        let first_voltage = psu.get_voltage();
        let first_power = psu.get_power();

        assert_eq!(psu.measure(), Err(Abort::Voltage));
        assert!(psu.get_current() > first_current);
        assert_eq!(psu.get_voltage(), first_voltage);
        assert_eq!(psu.get_power(), first_power);
        adc.done();
    }

    #[test]
    fn calibration_never_writes_readings() {
        let stream = [
            current_reads(&[612; 3]),
            voltage_reads(&[716; 2]),
            current_reads(&[600; 3]),
        ]
        .concat();
        let mut adc: Mock<u16> = Mock::new(&stream);
        let mut psu: Monitor<3, 2> = monitor(&adc);
        psu.measure().unwrap();
        let voltage = psu.get_voltage();
        let current = psu.get_current();
        let power = psu.get_power();

        psu.calibrate().unwrap();
        assert_eq!(psu.get_zero_offset(), 600.0);
        assert_eq!(psu.get_voltage(), voltage);
        assert_eq!(psu.get_current(), current);
        assert_eq!(psu.get_power(), power);
        adc.done();
    }

    #[test]
    fn acs712_30a_bench_scenario() {
        let stream = [
            current_reads(&[512; 200]),
            current_reads(&[512; 200]),
            voltage_reads(&[716; 20]),
        ]
        .concat();
        let mut adc: Mock<u16> = Mock::new(&stream);
        // Default sample counts: 200 current readings, 20 voltage readings.
        let mut psu = PowerMonitor::<MockAdc, Mock<u16>, MockChan0, MockChan1>::new(
            adc.clone(),
            MockChan0 {},
            MockChan1 {},
            ADC_CONV,
            VOLTS_PER_AMPERE,
        );
        psu.calibrate().unwrap();
        assert_eq!(psu.get_zero_offset(), 512.0);
        psu.measure().unwrap();
        assert_eq!(psu.get_current(), 0.0);
        assert!((psu.get_voltage() - 3.496).abs() < 0.001);
        assert_eq!(psu.get_power(), 0.0);
        adc.done();
    }
}
