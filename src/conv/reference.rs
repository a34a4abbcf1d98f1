use super::{ConvGeometry, ConvProblem, MacEngine, OutputSite, QuantElement};
use crate::error::ConvError;
use crate::quant::Accumulator;

/// In-memory nested-loop reduction. Stateless, so staging is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareMac;

impl<E: QuantElement> MacEngine<E> for SoftwareMac {
    fn stage(&mut self, _problem: &ConvProblem<'_, E>, _geometry: &ConvGeometry) -> Result<(), ConvError> { Ok(()) }

    #[inline]
    fn accumulate(&mut self, problem: &ConvProblem<'_, E>, geometry: &ConvGeometry, site: &OutputSite) -> Result<E::Acc, ConvError> {
        Ok(reduce_window(problem, geometry, site))
    }
}

/// Sum of `filter * (input + offset)` over the receptive field of `site`.
/// Taps that land in the padding contribute nothing.
pub fn reduce_window<E: QuantElement>(problem: &ConvProblem<'_, E>, g: &ConvGeometry, site: &OutputSite) -> E::Acc {
    let dilation = problem.params.dilation;
    let input_offset = problem.effective_input_offset();
    let channel_base = site.group * g.filter_input_depth;
    let mut acc = E::Acc::default();
    for filter_y in 0..g.filter_height {
        let in_y = site.in_y_origin + dilation.height * filter_y as i32;
        if in_y < 0 || in_y >= g.input_height as i32 {
            continue;
        }
        for filter_x in 0..g.filter_width {
            let in_x = site.in_x_origin + dilation.width * filter_x as i32;
            if in_x < 0 || in_x >= g.input_width as i32 {
                continue;
            }
            for in_channel in 0..g.filter_input_depth {
                let input_val = problem.input.at(site.batch, in_y as usize, in_x as usize, channel_base + in_channel).to_i32();
                let filter_val = problem.filter.at(site.out_channel, filter_y, filter_x, in_channel) as i32;
                // i8 * (i16 - i16) peaks at ~2^23, so the product fits i32 for both widths.
                acc += E::Acc::from_i32(filter_val * (input_val + input_offset));
            }
        }
    }
    acc
}
