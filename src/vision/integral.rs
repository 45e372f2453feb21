use image::GrayImage;

/// Summed-area tables of pixel values and squared pixel values.
/// Tables are `(w + 1) x (h + 1)` with a zero first row and column.
pub struct IntegralImage {
    width: u32,
    height: u32,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(img: &GrayImage) -> Self {
        let (width, height) = img.dimensions();
        let stride = width as usize + 1;
        let mut sum = vec![0u64; stride * (height as usize + 1)];
        let mut sq_sum = vec![0u64; stride * (height as usize + 1)];

        for y in 0..height as usize {
            let mut row_sum = 0u64;
            let mut row_sq_sum = 0u64;

            for x in 0..width as usize {
                let v = img.get_pixel(x as u32, y as u32)[0] as u64;
                row_sum += v;
                row_sq_sum += v * v;

                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq_sum;
            }
        }

        Self {
            width,
            height,
            sum,
            sq_sum,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);

        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0]
    }

    /// Sum of pixels in the rectangle. The rectangle must lie inside the image
    pub fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        debug_assert!(x + w <= self.width && y + h <= self.height);
        Self::rect(&self.sum, self.width as usize + 1, x, y, w, h)
    }

    pub fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        debug_assert!(x + w <= self.width && y + h <= self.height);
        Self::rect(&self.sq_sum, self.width as usize + 1, x, y, w, h)
    }

    /// Standard deviation of the pixels in the rectangle, 1.0 for flat regions
    pub fn std_dev(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let area = w as f64 * h as f64;
        if area == 0.0 {
            return 1.0;
        }

        let mean = self.rect_sum(x, y, w, h) as f64 / area;
        let var = self.rect_sq_sum(x, y, w, h) as f64 / area - mean * mean;

        if var > 0.0 {
            var.sqrt()
        } else {
            1.0
        }
    }
}
