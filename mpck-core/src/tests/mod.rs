mod test_metric;
