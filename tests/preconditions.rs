use accelconv::cfu::{CfuEmulator, RecordingChannel};
use accelconv::conv::MAX_INPUT_OFFSET;
use accelconv::{
    conv_accelerated, conv_reference, ActivationRange, Backend, ConvError, ConvParams, ConvProblem, Dilation,
    Padding, PerChannelQuant, Shape4, Stride, TensorView,
};
use pretty_assertions::assert_eq;

const SENTINEL: i8 = 0x5a;

/// Owned tensors for a valid grouped convolution: 4 input channels in 2 groups, 4 filters.
struct Fixture {
    params: ConvParams,
    multipliers: Vec<i32>,
    shifts: Vec<i32>,
    input_shape: Shape4,
    input: Vec<i8>,
    filter_shape: Shape4,
    filter: Vec<i8>,
    bias: Option<Vec<i32>>,
    output_shape: Shape4,
    output_len: usize,
}

impl Fixture {
    fn valid() -> Self {
        Self {
            params: ConvParams::default(),
            multipliers: vec![1 << 30; 4],
            shifts: vec![0; 4],
            input_shape: Shape4::new(1, 4, 4, 4),
            input: (0..64).map(|v| (v % 11) as i8 - 5).collect(),
            filter_shape: Shape4::new(4, 3, 3, 2),
            filter: (0..72).map(|v| (v % 5) as i8 - 2).collect(),
            bias: Some(vec![0; 4]),
            output_shape: Shape4::new(1, 2, 2, 4),
            output_len: 16,
        }
    }

    fn problem(&self) -> ConvProblem<'_, i8> {
        ConvProblem {
            params: &self.params,
            quant: PerChannelQuant::new(&self.multipliers, &self.shifts),
            input: TensorView::new(self.input_shape, &self.input),
            filter: TensorView::new(self.filter_shape, &self.filter),
            bias: self.bias.as_deref().map(TensorView::vector),
            output_shape: self.output_shape,
        }
    }

    /// Both paths must refuse with `expected`, leave the output untouched and issue nothing.
    fn rejects(&self, expected: ConvError) {
        let problem = self.problem();

        let mut out = vec![SENTINEL; self.output_len];
        assert_eq!(conv_reference(&problem, &mut out), Err(expected.clone()));
        assert!(out.iter().all(|&v| v == SENTINEL), "reference wrote output before failing");

        let mut rec = RecordingChannel::new(CfuEmulator::new());
        let mut out = vec![SENTINEL; self.output_len];
        assert_eq!(conv_accelerated(&mut rec, &problem, &mut out), Err(expected));
        assert!(out.iter().all(|&v| v == SENTINEL), "accelerator wrote output before failing");
        assert_eq!(rec.instructions().len(), 0);
    }
}

#[test]
fn fixture_is_valid() {
    let f = Fixture::valid();
    let mut expected = vec![0i8; 16];
    conv_reference(&f.problem(), &mut expected).unwrap();
    let mut got = vec![0i8; 16];
    conv_accelerated(&mut CfuEmulator::new(), &f.problem(), &mut got).unwrap();
    assert_eq!(expected, got);
}

#[test]
fn batch_counts_must_agree() {
    let mut f = Fixture::valid();
    f.output_shape = Shape4::new(2, 2, 2, 4);
    f.output_len = 32;
    f.rejects(ConvError::BatchMismatch { input: 1, output: 2 });
}

#[test]
fn filter_count_must_match_output_depth() {
    let mut f = Fixture::valid();
    f.output_shape = Shape4::new(1, 2, 2, 6);
    f.output_len = 24;
    f.rejects(ConvError::OutputDepthMismatch { filter: 4, output: 6 });
}

#[test]
fn input_depth_must_split_into_groups() {
    let mut f = Fixture::valid();
    f.filter_shape = Shape4::new(4, 3, 3, 3);
    f.filter = vec![1; 108];
    f.rejects(ConvError::GroupDivision { input_depth: 4, filter_input_depth: 3 });
}

#[test]
fn empty_input_depth_yields_no_groups() {
    let mut f = Fixture::valid();
    f.input_shape = Shape4::new(1, 4, 4, 0);
    f.input = Vec::new();
    f.rejects(ConvError::GroupDivision { input_depth: 0, filter_input_depth: 2 });
}

#[test]
fn filters_must_split_evenly_across_groups() {
    let mut f = Fixture::valid();
    f.input_shape = Shape4::new(1, 4, 4, 6);
    f.input = vec![0; 96];
    f.rejects(ConvError::FiltersPerGroup { output_depth: 4, groups: 3 });
}

#[test]
fn per_channel_tables_need_one_entry_per_output_channel() {
    let mut f = Fixture::valid();
    f.shifts.pop();
    f.rejects(ConvError::PerChannelLength { what: "output shift", got: 3, expected: 4 });

    let mut f = Fixture::valid();
    f.multipliers.push(1 << 30);
    f.rejects(ConvError::PerChannelLength { what: "output multiplier", got: 5, expected: 4 });

    let mut f = Fixture::valid();
    f.bias = Some(vec![0; 3]);
    f.rejects(ConvError::PerChannelLength { what: "bias", got: 3, expected: 4 });
}

#[test]
fn requantization_parameters_are_range_checked() {
    let mut f = Fixture::valid();
    f.multipliers[2] = -1;
    f.rejects(ConvError::NegativeMultiplier { channel: 2, multiplier: -1 });

    let mut f = Fixture::valid();
    f.shifts[1] = 8;
    f.rejects(ConvError::ShiftRange { channel: 1, shift: 8 });

    let mut f = Fixture::valid();
    f.shifts[3] = -32;
    f.rejects(ConvError::ShiftRange { channel: 3, shift: -32 });
}

#[test]
fn buffers_must_match_their_shapes() {
    let mut f = Fixture::valid();
    f.input.pop();
    f.rejects(ConvError::BufferLength { tensor: "input", got: 63, expected: 64 });

    let mut f = Fixture::valid();
    f.filter.push(0);
    f.rejects(ConvError::BufferLength { tensor: "filter", got: 73, expected: 72 });

    let mut f = Fixture::valid();
    f.output_len = 15;
    f.rejects(ConvError::BufferLength { tensor: "output", got: 15, expected: 16 });
}

#[test]
fn geometry_parameters_are_checked() {
    let mut f = Fixture::valid();
    f.params.stride = Stride { height: 0, width: 1 };
    f.rejects(ConvError::NonPositive { what: "stride", height: 0, width: 1 });

    let mut f = Fixture::valid();
    f.params.dilation = Dilation { height: 1, width: -1 };
    f.rejects(ConvError::NonPositive { what: "dilation", height: 1, width: -1 });

    let mut f = Fixture::valid();
    f.params.padding = Padding { height: -1, width: 0 };
    f.rejects(ConvError::NegativePadding { height: -1, width: 0 });
}

#[test]
fn input_offset_is_bounded() {
    let mut f = Fixture::valid();
    f.params.input_offset = 1 << 28;
    f.rejects(ConvError::InputOffsetRange { offset: 1 << 28, limit: 255 });

    let mut f = Fixture::valid();
    f.params.input_offset = -256;
    f.rejects(ConvError::InputOffsetRange { offset: -256, limit: 255 });
}

#[test]
fn extreme_input_offsets_agree_across_backends() {
    for offset in [-MAX_INPUT_OFFSET, MAX_INPUT_OFFSET] {
        let mut f = Fixture::valid();
        f.params.input_offset = offset;
        f.input = vec![127; 64];
        f.filter = vec![-127; 72];
        f.multipliers = vec![1 << 30; 4];
        f.shifts = vec![-12; 4];
        let mut expected = vec![0i8; 16];
        conv_reference(&f.problem(), &mut expected).unwrap();
        let mut got = vec![0i8; 16];
        conv_accelerated(&mut CfuEmulator::new(), &f.problem(), &mut got).unwrap();
        assert_eq!(expected, got, "offset {offset}");
    }
}

#[test]
fn activation_range_must_be_ordered_and_fit_the_element() {
    let mut f = Fixture::valid();
    f.params.activation = ActivationRange::new(10, -10);
    f.rejects(ConvError::ActivationRange { min: 10, max: -10, element: "int8" });

    let mut f = Fixture::valid();
    f.params.activation = ActivationRange::new(-128, 200);
    f.rejects(ConvError::ActivationRange { min: -128, max: 200, element: "int8" });
}

#[test]
fn int16_checks_against_its_own_range() {
    let params = ConvParams { activation: ActivationRange::new(-40_000, 0), ..ConvParams::default() };
    let input = [1i16; 4];
    let filter = [1i8; 4];
    let problem = ConvProblem {
        params: &params,
        quant: PerChannelQuant::new(&[1 << 30], &[1]),
        input: TensorView::new(Shape4::new(1, 2, 2, 1), &input),
        filter: TensorView::new(Shape4::new(1, 2, 2, 1), &filter),
        bias: None,
        output_shape: Shape4::new(1, 1, 1, 1),
    };
    let mut out = [0i16; 1];
    assert_eq!(
        conv_reference(&problem, &mut out),
        Err(ConvError::ActivationRange { min: -40_000, max: 0, element: "int16" })
    );

    // the full 16-bit range is fine for int16 but not for the int8 accelerator
    let params = ConvParams { activation: ActivationRange::full::<i16>(), ..ConvParams::default() };
    let problem = ConvProblem { params: &params, ..problem };
    conv_reference(&problem, &mut out).unwrap();
    assert_eq!(out, [4]);

    let mut rec = RecordingChannel::new(CfuEmulator::new());
    assert_eq!(
        Backend::Accelerator(&mut rec).run_i16(&problem, &mut out),
        Err(ConvError::AcceleratorUnsupported("int16"))
    );
    assert!(rec.instructions().is_empty());
}
